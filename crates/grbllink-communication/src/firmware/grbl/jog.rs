//! Interactive jog control
//!
//! A press starts a session that repeats a relative `$J=` move, each followed
//! by a status query, until the press is released. On release the session
//! keeps polling until the device leaves the Jog state, then sends the
//! jog-cancel byte and waits a grace period before releasing the transport.
//! A jog line the device rejects (`error:9` in alarm, `error:15` past a soft
//! limit) ends the Engaged phase as if released, and the reply is reported.
//!
//! Only one session runs at a time: a new press waits until the previous
//! session's worker has fully exited. Clones of a controller share that
//! guard, so hand out clones rather than building a second controller for
//! the same transport.

use grbllink_core::{AppEvent, EventBus, JogEvent, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::exchange::Exchange;
use super::executor::{CommandResponse, ExecutorTiming, SingleCommandExecutor};
use super::status_parser::{DeviceStatusModel, MachineState};
use super::utils::{format_distance, JOG_CANCEL};
use crate::communication::Transport;

/// Intervals of a jog session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JogTiming {
    /// Interval between acknowledgment checks
    pub ack_poll_interval: Duration,
    /// Interval between checks of the previous session's worker flag
    pub press_wait_interval: Duration,
    /// Extra delay after the first move so the next status shows motion
    pub first_move_dwell: Duration,
    /// Delay after the jog-cancel byte before the session ends
    pub release_grace: Duration,
}

impl Default for JogTiming {
    fn default() -> Self {
        Self {
            ack_poll_interval: Duration::from_millis(20),
            press_wait_interval: Duration::from_millis(50),
            first_move_dwell: Duration::from_millis(50),
            release_grace: Duration::from_millis(500),
        }
    }
}

/// Speed slider scaling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogScale {
    /// Feed rate at slider 100
    pub base_feed: f64,
    /// Lowest feed rate sent
    pub min_feed: f64,
    /// Step distance (inches) at slider 100
    pub base_step: f64,
    /// Lowest slider value
    pub min_slider: u32,
    /// Highest slider value
    pub max_slider: u32,
}

impl Default for JogScale {
    fn default() -> Self {
        Self {
            base_feed: 75.0,
            min_feed: 5.0,
            base_step: 0.1,
            min_slider: 10,
            max_slider: 100,
        }
    }
}

/// Feed rate and step distance derived from a slider value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JogParameters {
    /// Slider value the parameters came from
    pub slider: u32,
    /// Feed rate, `max(base_feed * ratio, min_feed)`
    pub feed_rate: f64,
    /// Step distance in inches, `base_step * ratio`
    pub step: f64,
}

impl JogParameters {
    /// Scale `slider` (percent) against `scale`.
    pub fn from_slider(slider: u32, scale: &JogScale) -> Result<Self> {
        if !(scale.min_slider..=scale.max_slider).contains(&slider) {
            return Err(ProtocolError::InvalidJogSpeed {
                value: slider,
                min: scale.min_slider,
                max: scale.max_slider,
            }
            .into());
        }
        let ratio = f64::from(slider) / 100.0;
        Ok(Self {
            slider,
            feed_rate: (scale.base_feed * ratio).max(scale.min_feed),
            step: scale.base_step * ratio,
        })
    }

    /// Build the relative jog line for an axis template.
    ///
    /// Every `%` in `template` is replaced by the step distance.
    pub fn command(&self, template: &str) -> String {
        format!(
            "$J=G91 G20 F{} {}",
            format_distance(self.feed_rate),
            template.replace('%', &format_distance(self.step))
        )
    }
}

/// The ten buttons of the jog pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JogDirection {
    /// X- and Y-
    XNegYNeg,
    /// Y-
    YNeg,
    /// X+ and Y-
    XPosYNeg,
    /// Z+
    ZPos,
    /// X-
    XNeg,
    /// X+
    XPos,
    /// X- and Y+
    XNegYPos,
    /// Y+
    YPos,
    /// X+ and Y+
    XPosYPos,
    /// Z-
    ZNeg,
}

impl JogDirection {
    /// Pad order
    pub const ALL: [JogDirection; 10] = [
        Self::XNegYNeg,
        Self::YNeg,
        Self::XPosYNeg,
        Self::ZPos,
        Self::XNeg,
        Self::XPos,
        Self::XNegYPos,
        Self::YPos,
        Self::XPosYPos,
        Self::ZNeg,
    ];

    /// Axis template, `%` standing for the step distance
    pub fn template(self) -> &'static str {
        match self {
            Self::XNegYNeg => "Y-% X-%",
            Self::YNeg => "Y-%",
            Self::XPosYNeg => "Y-% X+%",
            Self::ZPos => "Z+%",
            Self::XNeg => "X-%",
            Self::XPos => "X+%",
            Self::XNegYPos => "Y+% X-%",
            Self::YPos => "Y+%",
            Self::XPosYPos => "Y+% X+%",
            Self::ZNeg => "Z-%",
        }
    }

    /// Short name as accepted by `from_str` (`x-y+`, `z-`, ...)
    pub fn name(self) -> &'static str {
        match self {
            Self::XNegYNeg => "x-y-",
            Self::YNeg => "y-",
            Self::XPosYNeg => "x+y-",
            Self::ZPos => "z+",
            Self::XNeg => "x-",
            Self::XPos => "x+",
            Self::XNegYPos => "x-y+",
            Self::YPos => "y+",
            Self::XPosYPos => "x+y+",
            Self::ZNeg => "z-",
        }
    }
}

impl std::fmt::Display for JogDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for JogDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|direction| direction.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|d| d.name()).collect();
                format!("unknown jog direction {:?} (expected one of {})", s, names.join(", "))
            })
    }
}

/// How a jog dialog was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JogOutcome {
    /// Make the current position the new origin
    SetOrigin,
    /// Return to the origin held before jogging
    Cancel,
}

/// Commands sent for each [`JogOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginCommands {
    /// Sent on `SetOrigin`
    pub set_origin: String,
    /// Sent on `Cancel`
    pub cancel: String,
}

impl Default for OriginCommands {
    fn default() -> Self {
        Self {
            set_origin: "G92 X0 Y0 Z0".to_string(),
            cancel: "G00 X0 Y0 Z0".to_string(),
        }
    }
}

impl OriginCommands {
    /// Command for `outcome`
    pub fn command(&self, outcome: JogOutcome) -> &str {
        match outcome {
            JogOutcome::SetOrigin => &self.set_origin,
            JogOutcome::Cancel => &self.cancel,
        }
    }
}

/// Summary of a finished jog session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JogReport {
    /// The jog line the session repeated
    pub command: String,
    /// Jog lines acknowledged
    pub moves: u64,
    /// Status queries answered
    pub status_polls: u64,
    /// Failure or device rejection that ended the session
    pub error: Option<String>,
}

/// Clears the single-session flag when the worker exits, however it exits.
struct WorkerFlag(Arc<AtomicBool>);

impl Drop for WorkerFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running jog session
#[derive(Debug)]
pub struct JogSession {
    release: CancellationToken,
    join: JoinHandle<JogReport>,
    command: String,
    parameters: JogParameters,
}

impl JogSession {
    /// Signal release; the session proceeds through its Releasing phase.
    pub fn release(&self) {
        self.release.cancel();
    }

    /// Jog line of this session
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Feed and step of this session
    pub fn parameters(&self) -> JogParameters {
        self.parameters
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Release (if not already) and wait for the session to stop.
    pub async fn finish(self) -> JogReport {
        self.release.cancel();
        match self.join.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Jog worker failed: {}", e);
                JogReport {
                    command: self.command,
                    error: Some(e.to_string()),
                    ..JogReport::default()
                }
            }
        }
    }
}

/// Jog pad controller
#[derive(Clone)]
pub struct JogController {
    transport: Arc<dyn Transport>,
    status: DeviceStatusModel,
    bus: Arc<EventBus>,
    timing: JogTiming,
    scale: JogScale,
    origin: OriginCommands,
    executor_timing: ExecutorTiming,
    worker_active: Arc<AtomicBool>,
}

impl JogController {
    /// Create a controller
    pub fn new(
        transport: Arc<dyn Transport>,
        status: DeviceStatusModel,
        bus: Arc<EventBus>,
        timing: JogTiming,
        scale: JogScale,
    ) -> Self {
        Self {
            transport,
            status,
            bus,
            timing,
            scale,
            origin: OriginCommands::default(),
            executor_timing: ExecutorTiming::default(),
            worker_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `origin` for dialog outcomes
    pub fn with_origin_commands(mut self, origin: OriginCommands) -> Self {
        self.origin = origin;
        self
    }

    /// Wait budget of the outcome command
    pub fn with_executor_timing(mut self, timing: ExecutorTiming) -> Self {
        self.executor_timing = timing;
        self
    }

    /// Whether a session worker is running
    pub fn is_active(&self) -> bool {
        self.worker_active.load(Ordering::SeqCst)
    }

    /// Press a pad button.
    pub async fn press_direction(&self, direction: JogDirection, slider: u32) -> Result<JogSession> {
        self.press(direction.template(), slider).await
    }

    /// Start a session jogging along `template` at `slider` percent.
    ///
    /// Waits for the previous session's worker to exit first.
    pub async fn press(&self, template: &str, slider: u32) -> Result<JogSession> {
        let parameters = JogParameters::from_slider(slider, &self.scale)?;
        let command = parameters.command(template);

        while self
            .worker_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tokio::time::sleep(self.timing.press_wait_interval).await;
        }
        let flag = WorkerFlag(self.worker_active.clone());

        let release = CancellationToken::new();
        let worker = self.clone();
        let token = release.clone();
        let worker_command = command.clone();
        let join = tokio::spawn(async move {
            worker
                .run_session(flag, worker_command, parameters, token)
                .await
        });

        Ok(JogSession {
            release,
            join,
            command,
            parameters,
        })
    }

    /// Send the command for a dialog outcome.
    ///
    /// Meant for after the session has stopped; it takes the receive slot
    /// like any single command.
    pub async fn apply_outcome(&self, outcome: JogOutcome) -> CommandResponse {
        let executor = SingleCommandExecutor::new(
            self.transport.clone(),
            self.status.clone(),
            self.bus.clone(),
            self.executor_timing,
        );
        executor.execute_report(self.origin.command(outcome)).await
    }

    async fn run_session(
        &self,
        flag: WorkerFlag,
        command: String,
        parameters: JogParameters,
        release: CancellationToken,
    ) -> JogReport {
        let _flag = flag;
        let mut report = JogReport {
            command: command.clone(),
            ..JogReport::default()
        };

        tracing::info!("Jog session started: {}", command);
        self.bus.publish(AppEvent::Jog(JogEvent::SessionStarted {
            command: command.clone(),
            feed_rate: parameters.feed_rate,
        }));

        match Exchange::open(
            self.transport.clone(),
            "jog",
            self.status.clone(),
            self.bus.clone(),
        ) {
            Ok(exchange) => {
                exchange.complete_on_rejection();
                if let Err(e) = self.drive(&exchange, &command, &release, &mut report).await {
                    tracing::error!("Jog session ended early: {}", e);
                    report.error = Some(e.to_string());
                    if let Err(e) = exchange.send_realtime(JOG_CANCEL) {
                        tracing::warn!("Jog cancel not sent: {}", e);
                    }
                }
                // Release the slot before the flag so a waiting press can bind.
                drop(exchange);
            }
            Err(e) => {
                tracing::error!("Jog session could not start: {}", e);
                report.error = Some(e.to_string());
            }
        }

        tracing::info!("Jog session stopped after {} moves", report.moves);
        self.bus.publish(AppEvent::Jog(JogEvent::Stopped { moves: report.moves }));
        report
    }

    async fn drive(
        &self,
        exchange: &Exchange,
        command: &str,
        release: &CancellationToken,
        report: &mut JogReport,
    ) -> Result<()> {
        let poll = self.timing.ack_poll_interval;
        let mut first_move = true;

        while !release.is_cancelled() {
            exchange.send_line(command)?;
            exchange.wait(poll, None).await?;
            if let Some(reply) = exchange.take_rejection() {
                tracing::warn!("Jog rejected: {}", reply);
                report.error = Some(format!("jog rejected: {}", reply));
                break;
            }
            report.moves += 1;

            exchange.query_status()?;
            exchange.wait(poll, None).await?;
            exchange.take_rejection();
            report.status_polls += 1;

            if first_move {
                tokio::time::sleep(self.timing.first_move_dwell).await;
                first_move = false;
            }
        }

        self.bus.publish(AppEvent::Jog(JogEvent::Releasing));
        loop {
            exchange.query_status()?;
            exchange.wait(poll, None).await?;
            exchange.take_rejection();
            report.status_polls += 1;

            if exchange.last_state() != Some(MachineState::Jog) {
                break;
            }
        }

        exchange.send_realtime(JOG_CANCEL)?;
        tokio::time::sleep(self.timing.release_grace).await;
        Ok(())
    }
}

impl std::fmt::Debug for JogController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JogController")
            .field("transport", &self.transport.name())
            .field("active", &self.is_active())
            .field("scale", &self.scale)
            .finish()
    }
}
