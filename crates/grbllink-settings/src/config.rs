//! Configuration for GRBLLink
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in the platform config
//! directory (`<config_dir>/grbllink/config.toml` by default).
//!
//! Configuration is organized into sections:
//! - Connection settings (port, baud rate, framing)
//! - Single command executor timing
//! - Batch streamer timing
//! - Jog pad timing, speed scaling and origin commands
//!
//! Every section converts into the plain timing/scale structs the protocol
//! layer takes, so that layer never sees this crate.

use grbllink_communication::{
    BatchTiming, ConnectionParams, ExecutorTiming, JogScale, JogTiming, OriginCommands,
    SerialParity,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port; empty means "ask"
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Reader thread timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            read_timeout_ms: 10,
        }
    }
}

impl ConnectionSettings {
    /// Transport parameters, with `port` overriding the configured one
    pub fn to_params(&self, port: Option<&str>) -> ConnectionParams {
        ConnectionParams {
            port: port.unwrap_or(&self.port).to_string(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
            timeout_ms: self.read_timeout_ms,
        }
    }
}

/// Single command executor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Interval between acknowledgment checks
    pub poll_interval_ms: u64,
    /// Checks before giving up
    pub poll_iterations: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            poll_iterations: 10,
        }
    }
}

impl ExecutorSettings {
    /// Executor timing
    pub fn timing(&self) -> ExecutorTiming {
        ExecutorTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.poll_iterations,
        }
    }
}

/// Batch streamer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Interval between acknowledgment checks
    pub ack_poll_interval_ms: u64,
    /// Delay before each status query while waiting for Idle
    pub status_poll_interval_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            ack_poll_interval_ms: 100,
            status_poll_interval_ms: 200,
        }
    }
}

impl BatchSettings {
    /// Batch timing
    pub fn timing(&self) -> BatchTiming {
        BatchTiming {
            ack_poll_interval: Duration::from_millis(self.ack_poll_interval_ms),
            status_poll_interval: Duration::from_millis(self.status_poll_interval_ms),
        }
    }
}

/// Jog pad settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JogSettings {
    /// Interval between acknowledgment checks
    pub ack_poll_interval_ms: u64,
    /// Interval between checks for the previous session to end
    pub press_wait_interval_ms: u64,
    /// Extra delay after the first move
    pub first_move_dwell_ms: u64,
    /// Delay after the jog-cancel byte
    pub release_grace_ms: u64,
    /// Feed rate at full speed
    pub base_feed: f64,
    /// Lowest feed rate
    pub min_feed: f64,
    /// Step distance in inches at full speed
    pub base_step: f64,
    /// Speed slider value used when none is given
    pub default_speed: u32,
    /// Lowest speed slider value
    pub min_speed: u32,
    /// Highest speed slider value
    pub max_speed: u32,
    /// Sent when a jog is confirmed
    pub set_origin_command: String,
    /// Sent when a jog is cancelled
    pub cancel_command: String,
}

impl Default for JogSettings {
    fn default() -> Self {
        let scale = JogScale::default();
        let origin = OriginCommands::default();
        Self {
            ack_poll_interval_ms: 20,
            press_wait_interval_ms: 50,
            first_move_dwell_ms: 50,
            release_grace_ms: 500,
            base_feed: scale.base_feed,
            min_feed: scale.min_feed,
            base_step: scale.base_step,
            default_speed: 100,
            min_speed: scale.min_slider,
            max_speed: scale.max_slider,
            set_origin_command: origin.set_origin,
            cancel_command: origin.cancel,
        }
    }
}

impl JogSettings {
    /// Jog timing
    pub fn timing(&self) -> JogTiming {
        JogTiming {
            ack_poll_interval: Duration::from_millis(self.ack_poll_interval_ms),
            press_wait_interval: Duration::from_millis(self.press_wait_interval_ms),
            first_move_dwell: Duration::from_millis(self.first_move_dwell_ms),
            release_grace: Duration::from_millis(self.release_grace_ms),
        }
    }

    /// Speed slider scaling
    pub fn scale(&self) -> JogScale {
        JogScale {
            base_feed: self.base_feed,
            min_feed: self.min_feed,
            base_step: self.base_step,
            min_slider: self.min_speed,
            max_slider: self.max_speed,
        }
    }

    /// Origin commands
    pub fn origin_commands(&self) -> OriginCommands {
        OriginCommands {
            set_origin: self.set_origin_command.clone(),
            cancel: self.cancel_command.clone(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Single command executor
    pub executor: ExecutorSettings,
    /// Batch streamer
    pub batch: BatchSettings,
    /// Jog pad
    pub jog: JogSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> ConfigResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("grbllink").join("config.toml"))
            .ok_or_else(|| {
                ConfigError::UnsupportedPlatform("no config directory".to_string()).into()
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` (or the default location); a missing file yields defaults.
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Config as TOML text
    pub fn to_toml_string(&self) -> SettingsResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => self.to_toml_string()?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::ConfigDirectory(e.to_string()))?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        // Connection
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if !(5..=8).contains(&self.connection.data_bits) {
            return Err(SettingsError::invalid("connection.data_bits", "must be 5-8"));
        }
        if !(1..=2).contains(&self.connection.stop_bits) {
            return Err(SettingsError::invalid("connection.stop_bits", "must be 1 or 2"));
        }

        // Timing
        let intervals = [
            ("connection.read_timeout_ms", self.connection.read_timeout_ms),
            ("executor.poll_interval_ms", self.executor.poll_interval_ms),
            ("batch.ack_poll_interval_ms", self.batch.ack_poll_interval_ms),
            ("batch.status_poll_interval_ms", self.batch.status_poll_interval_ms),
            ("jog.ack_poll_interval_ms", self.jog.ack_poll_interval_ms),
            ("jog.press_wait_interval_ms", self.jog.press_wait_interval_ms),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(SettingsError::invalid(key, "must be > 0"));
        }
        if self.executor.poll_iterations == 0 {
            return Err(SettingsError::invalid("executor.poll_iterations", "must be > 0"));
        }

        // Jog scaling
        let jog = &self.jog;
        if jog.base_feed <= 0.0 || jog.min_feed <= 0.0 {
            return Err(SettingsError::invalid("jog.base_feed", "feeds must be > 0"));
        }
        if jog.base_step <= 0.0 {
            return Err(SettingsError::invalid("jog.base_step", "must be > 0"));
        }
        if jog.min_speed == 0 || jog.min_speed > jog.max_speed {
            return Err(SettingsError::invalid(
                "jog.min_speed",
                format!("empty speed range {}..={}", jog.min_speed, jog.max_speed),
            ));
        }
        if !(jog.min_speed..=jog.max_speed).contains(&jog.default_speed) {
            return Err(SettingsError::invalid(
                "jog.default_speed",
                "must lie within min_speed..=max_speed",
            ));
        }
        if jog.set_origin_command.trim().is_empty() || jog.cancel_command.trim().is_empty() {
            return Err(SettingsError::invalid("jog", "origin commands must not be empty"));
        }

        Ok(())
    }
}
