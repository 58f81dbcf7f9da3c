//! # GRBLLink
//!
//! Command/acknowledgment link to GRBL-family CNC and laser controllers.
//!
//! ## Architecture
//!
//! GRBLLink is organized as a workspace with multiple crates:
//!
//! 1. **grbllink-core** - Errors, shared type aliases, event bus
//! 2. **grbllink-communication** - Serial/simulated transports and the GRBL
//!    protocol operations (single command, batch, jog, settings)
//! 3. **grbllink-settings** - Configuration file handling
//! 4. **grbllink** - This crate: logging setup, the [`Link`] facade and the CLI
//!
//! ## Features
//!
//! - **Single commands**: send one line, wait a bounded time for `ok`
//! - **Batches**: stream a program under the acknowledgment gate, poll until
//!   Idle, abort between commands with a configurable abort sequence
//! - **Jogging**: press-and-hold relative jogs with a clean release handshake
//! - **Settings**: read `$I`/`$$`, write back edited values

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use grbllink_communication::{
    catalog, describe, list_ports, BatchCommandStreamer, BatchHandle, BatchJob, BatchOutcome,
    CommandResponse, ConnectionParams, DeviceStatus, DeviceStatusModel, FirmwareInfo,
    JogController, JogDirection, JogOutcome, JogReport, JogSession, MachineState,
    SerialPortInfo, SerialTransport, SettingsReader, SettingsTable, SimulatedDevice,
    SingleCommandExecutor, Transport,
};
pub use grbllink_core::{
    AppEvent, ConnectionError, ConnectionEvent, Error, EventBus, EventCategory, EventFilter,
    ProgressCallback, ProtocolError, Result,
};
pub use grbllink_settings::{Config, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Reply latency of the simulated device
pub const SIMULATOR_LATENCY: Duration = Duration::from_millis(5);

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support
/// - INFO (or DEBUG when `verbose`) as the default level
/// - Pretty console output on stderr, or JSON lines when `json`
pub fn init_logging(verbose: bool, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(verbose)
            .pretty();
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}

/// An open transport with its event bus, status model and configuration
///
/// Hands out the protocol operations wired to the same transport, so they
/// share the receive slot (and therefore exclude each other) and the status
/// model. Jog controllers are clones of one controller and so also share
/// its single-session guard.
#[derive(Clone)]
pub struct Link {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    status: DeviceStatusModel,
    jog: JogController,
    config: Config,
}

impl Link {
    /// Wrap an already open transport.
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        let bus = Arc::new(EventBus::new());
        let status = DeviceStatusModel::new(bus.clone());
        let jog = JogController::new(
            transport.clone(),
            status.clone(),
            bus.clone(),
            config.jog.timing(),
            config.jog.scale(),
        )
        .with_origin_commands(config.jog.origin_commands())
        .with_executor_timing(config.executor.timing());
        bus.publish(AppEvent::Connection(ConnectionEvent::Connected {
            port: transport.name(),
        }));
        Self {
            transport,
            bus,
            status,
            jog,
            config,
        }
    }

    /// Drop this handle, announcing the disconnect.
    ///
    /// The transport itself closes once the last clone is gone.
    pub fn close(self, reason: &str) {
        tracing::debug!("Closing {}: {}", self.transport.name(), reason);
        self.bus.publish(AppEvent::Connection(ConnectionEvent::Disconnected {
            port: self.transport.name(),
            reason: reason.to_string(),
        }));
    }

    /// Open the serial port named by `port`, or by the configuration.
    pub fn open_serial(config: Config, port: Option<&str>) -> Result<Self> {
        let params = config.connection.to_params(port);
        if params.port.is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "no serial port given".to_string(),
            }
            .into());
        }
        let transport = SerialTransport::open(&params)?;
        tracing::info!("Connected to {} at {} baud", params.port, params.baud_rate);
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Link to an in-memory simulated device.
    pub fn simulated(config: Config) -> (Self, Arc<SimulatedDevice>) {
        let device = Arc::new(SimulatedDevice::new().with_latency(SIMULATOR_LATENCY));
        let link = Self::new(device.clone(), config);
        (link, device)
    }

    /// Load configuration from `path` (or the default location).
    pub fn load_config(path: Option<&Path>) -> std::result::Result<Config, SettingsError> {
        Config::load_or_default(path)
    }

    /// Transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Event bus
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Shared status model
    pub fn status(&self) -> &DeviceStatusModel {
        &self.status
    }

    /// Configuration the link was built from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Single command executor
    pub fn executor(&self) -> SingleCommandExecutor {
        SingleCommandExecutor::new(
            self.transport.clone(),
            self.status.clone(),
            self.bus.clone(),
            self.config.executor.timing(),
        )
    }

    /// Batch streamer
    pub fn streamer(&self) -> BatchCommandStreamer {
        BatchCommandStreamer::new(
            self.transport.clone(),
            self.status.clone(),
            self.bus.clone(),
            self.config.batch.timing(),
        )
    }

    /// Jog controller
    ///
    /// Every handle is a clone of the link's controller, so a press on one
    /// waits for a session started through another.
    pub fn jog_controller(&self) -> JogController {
        self.jog.clone()
    }

    /// Settings reader
    pub fn settings_reader(&self) -> SettingsReader {
        SettingsReader::new(self.executor())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("transport", &self.transport.name())
            .field("status", &self.status)
            .finish()
    }
}
