//! Batch command streaming
//!
//! Runs an ordered list of commands one at a time under the acknowledgment
//! gate, then polls `?` until the device reports Idle. An abort request is
//! honoured between commands only: the remaining primary commands are
//! skipped and the job's abort commands are sent instead, followed by the
//! same Idle poll.
//!
//! A command the device rejects (`error:`/`ALARM:`) still counts as answered;
//! the rejection is recorded in the outcome and the run carries on.
//!
//! The soft-reset byte is never used to abort; some firmware builds refuse
//! jog commands after it.

use grbllink_core::{AppEvent, BatchEvent, EventBus, ProgressCallback, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::exchange::Exchange;
use super::status_parser::{DeviceStatusModel, MachineState};
use crate::communication::Transport;

/// Poll intervals of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTiming {
    /// Interval between acknowledgment checks
    pub ack_poll_interval: Duration,
    /// Delay before each status query of the Idle poll
    pub status_poll_interval: Duration,
}

impl Default for BatchTiming {
    fn default() -> Self {
        Self {
            ack_poll_interval: Duration::from_millis(100),
            status_poll_interval: Duration::from_millis(200),
        }
    }
}

/// Commands of one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchJob {
    /// Primary commands, in order
    pub commands: Vec<String>,
    /// Commands sent instead of the remainder when aborted
    pub abort_commands: Vec<String>,
}

impl BatchJob {
    /// Job with no abort sequence
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            abort_commands: Vec::new(),
        }
    }

    /// Set the abort sequence
    pub fn with_abort_commands(mut self, abort_commands: Vec<String>) -> Self {
        self.abort_commands = abort_commands;
        self
    }

    /// Job from program text: one command per non-blank line.
    pub fn from_program(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Summary of a finished batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Primary commands in the job
    pub total: usize,
    /// Primary commands sent and answered
    pub sent: usize,
    /// Whether the abort sequence ran
    pub aborted: bool,
    /// Abort commands sent and answered
    pub abort_commands_sent: usize,
    /// Commands the device rejected, as `command: reply`
    pub rejected: Vec<String>,
    /// Status queries answered
    pub status_polls: usize,
    /// Gate issue count at the end of the run
    pub issued: u64,
    /// Gate completion count at the end of the run
    pub completed: u64,
    /// Transport or protocol failure that ended the run early
    pub error: Option<String>,
}

impl BatchOutcome {
    /// True when every primary command was accepted and the device went Idle
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
            && !self.aborted
            && self.rejected.is_empty()
            && self.sent == self.total
    }
}

/// Handle to a batch run on a spawned task
#[derive(Debug)]
pub struct BatchHandle {
    abort: CancellationToken,
    join: JoinHandle<BatchOutcome>,
}

impl BatchHandle {
    /// Request an abort; takes effect after the in-flight command.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Token that aborts this run when cancelled
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Whether the run has ended
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> BatchOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Batch task failed: {}", e);
                BatchOutcome {
                    error: Some(e.to_string()),
                    ..BatchOutcome::default()
                }
            }
        }
    }
}

/// Supervised batch runner
#[derive(Clone)]
pub struct BatchCommandStreamer {
    transport: Arc<dyn Transport>,
    status: DeviceStatusModel,
    bus: Arc<EventBus>,
    timing: BatchTiming,
}

impl BatchCommandStreamer {
    /// Create a streamer
    pub fn new(
        transport: Arc<dyn Transport>,
        status: DeviceStatusModel,
        bus: Arc<EventBus>,
        timing: BatchTiming,
    ) -> Self {
        Self {
            transport,
            status,
            bus,
            timing,
        }
    }

    /// Start `job` on a spawned task.
    pub fn start(&self, job: BatchJob, progress: Option<ProgressCallback>) -> BatchHandle {
        let abort = CancellationToken::new();
        let streamer = self.clone();
        let token = abort.clone();
        let join = tokio::spawn(async move { streamer.run(job, token, progress).await });
        BatchHandle { abort, join }
    }

    /// Run `job` to completion on the current task.
    ///
    /// `progress` receives `(index, total)` before each primary command.
    pub async fn run(
        &self,
        job: BatchJob,
        abort: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> BatchOutcome {
        let total = job.commands.len();
        let mut outcome = BatchOutcome {
            total,
            ..BatchOutcome::default()
        };

        tracing::info!(
            "Batch started: {} commands, {} abort commands",
            total,
            job.abort_commands.len()
        );
        self.bus.publish(AppEvent::Batch(BatchEvent::Started { total }));

        match Exchange::open(
            self.transport.clone(),
            "batch",
            self.status.clone(),
            self.bus.clone(),
        ) {
            Ok(exchange) => {
                exchange.complete_on_rejection();
                let result = self
                    .drive(&exchange, &job, &abort, progress.as_ref(), &mut outcome)
                    .await;
                outcome.issued = exchange.gate().issued();
                outcome.completed = exchange.gate().completed();
                drop(exchange);
                if let Err(e) = result {
                    tracing::error!("Batch ended early: {}", e);
                    outcome.error = Some(e.to_string());
                }
            }
            Err(e) => {
                tracing::error!("Batch could not start: {}", e);
                outcome.error = Some(e.to_string());
            }
        }

        tracing::info!(
            "Batch finished: {}/{} sent, aborted={}",
            outcome.sent,
            total,
            outcome.aborted
        );
        self.bus.publish(AppEvent::Batch(BatchEvent::Finished {
            sent: outcome.sent,
            aborted: outcome.aborted,
        }));
        outcome
    }

    async fn drive(
        &self,
        exchange: &Exchange,
        job: &BatchJob,
        abort: &CancellationToken,
        progress: Option<&ProgressCallback>,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let total = job.commands.len();

        for (index, command) in job.commands.iter().enumerate() {
            if abort.is_cancelled() {
                break;
            }
            if let Some(progress) = progress {
                progress(index as u64, total as u64);
            }
            self.bus.publish(AppEvent::Batch(BatchEvent::Progress { index, total }));

            self.send_command(exchange, command, outcome).await?;
            outcome.sent += 1;
        }

        loop {
            if abort.is_cancelled() && !outcome.aborted {
                self.send_abort_commands(exchange, job, outcome).await?;
            }

            if outcome.aborted {
                tokio::time::sleep(self.timing.status_poll_interval).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(self.timing.status_poll_interval) => {}
                    _ = abort.cancelled() => continue,
                }
            }

            exchange.query_status()?;
            exchange.wait(self.timing.ack_poll_interval, None).await?;
            exchange.take_rejection();
            outcome.status_polls += 1;

            if abort.is_cancelled() && !outcome.aborted {
                continue;
            }
            if exchange.last_state() == Some(MachineState::Idle) {
                return Ok(());
            }
        }
    }

    async fn send_abort_commands(
        &self,
        exchange: &Exchange,
        job: &BatchJob,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        outcome.aborted = true;
        tracing::info!("Batch abort after {} commands", outcome.sent);
        self.bus.publish(AppEvent::Batch(BatchEvent::AbortRequested {
            sent: outcome.sent,
        }));

        for command in &job.abort_commands {
            self.send_command(exchange, command, outcome).await?;
            outcome.abort_commands_sent += 1;
        }
        Ok(())
    }

    /// Send one line and wait for its answer, recording a rejection.
    async fn send_command(
        &self,
        exchange: &Exchange,
        command: &str,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        exchange.send_line(command)?;
        exchange.wait(self.timing.ack_poll_interval, None).await?;
        if let Some(reply) = exchange.take_rejection() {
            tracing::warn!("{:?} rejected: {}", command, reply);
            outcome.rejected.push(format!("{}: {}", command, reply));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BatchCommandStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCommandStreamer")
            .field("transport", &self.transport.name())
            .field("timing", &self.timing)
            .finish()
    }
}
