//! Single command execution
//!
//! Sends one line, waits a bounded time for `ok` and returns whatever text
//! came back. Failures never propagate: a timeout, a busy receive slot or a
//! transport error all end in a best-effort response.

use grbllink_core::{AppEvent, CommunicationEvent, EventBus, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::exchange::Exchange;
use super::status_parser::DeviceStatusModel;
use crate::communication::Transport;

/// Wait budget of a single command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorTiming {
    /// Interval between acknowledgment checks
    pub poll_interval: Duration,
    /// Checks before giving up
    pub max_polls: u32,
}

impl Default for ExecutorTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_polls: 10,
        }
    }
}

impl ExecutorTiming {
    /// Total wait budget
    pub fn budget(&self) -> Duration {
        self.poll_interval * self.max_polls
    }
}

/// Outcome of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResponse {
    /// Response lines, `ok` excluded, each followed by a newline
    pub text: String,
    /// Whether `ok` arrived within the budget
    pub acknowledged: bool,
}

/// One-shot command runner
#[derive(Clone)]
pub struct SingleCommandExecutor {
    transport: Arc<dyn Transport>,
    status: DeviceStatusModel,
    bus: Arc<EventBus>,
    timing: ExecutorTiming,
}

impl SingleCommandExecutor {
    /// Create an executor
    pub fn new(
        transport: Arc<dyn Transport>,
        status: DeviceStatusModel,
        bus: Arc<EventBus>,
        timing: ExecutorTiming,
    ) -> Self {
        Self {
            transport,
            status,
            bus,
            timing,
        }
    }

    /// Send `command` and return the response text.
    ///
    /// The text is best-effort; it may be partial if the budget ran out.
    pub async fn execute(&self, command: &str) -> String {
        self.execute_report(command).await.text
    }

    /// Send `command` and report whether it was acknowledged.
    pub async fn execute_report(&self, command: &str) -> CommandResponse {
        let exchange = match Exchange::open(
            self.transport.clone(),
            "single-command",
            self.status.clone(),
            self.bus.clone(),
        ) {
            Ok(exchange) => exchange,
            Err(e) => {
                tracing::error!("Cannot run {:?}: {}", command, e);
                return CommandResponse::default();
            }
        };

        let result = self.exchange(&exchange, command).await;
        let text = exchange.response_text();
        drop(exchange);

        match result {
            Ok(()) => CommandResponse {
                text,
                acknowledged: true,
            },
            Err(e) => {
                if e.is_timeout() {
                    tracing::warn!("No acknowledgment for {:?}: {}", command, e);
                    self.bus.publish(AppEvent::Communication(CommunicationEvent::AckTimeout {
                        command: command.to_string(),
                    }));
                } else {
                    tracing::error!("Command {:?} failed: {}", command, e);
                }
                CommandResponse {
                    text,
                    acknowledged: false,
                }
            }
        }
    }

    async fn exchange(&self, exchange: &Exchange, command: &str) -> Result<()> {
        exchange.send_line(command)?;
        exchange
            .wait(self.timing.poll_interval, Some(self.timing.max_polls))
            .await
    }

    /// Run `command` on a spawned task.
    pub fn spawn(&self, command: impl Into<String>) -> JoinHandle<CommandResponse> {
        let executor = self.clone();
        let command = command.into();
        tokio::spawn(async move { executor.execute_report(&command).await })
    }

    /// Shared status model
    pub fn status(&self) -> &DeviceStatusModel {
        &self.status
    }

    /// Configured wait budget
    pub fn timing(&self) -> ExecutorTiming {
        self.timing
    }
}

impl std::fmt::Debug for SingleCommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleCommandExecutor")
            .field("transport", &self.transport.name())
            .field("timing", &self.timing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_is_one_second() {
        let timing = ExecutorTiming::default();
        assert_eq!(timing.budget(), Duration::from_secs(1));
    }
}
