//! Event type definitions for the event bus.
//!
//! Events are cloneable and serializable so a UI (or a log sink) can consume
//! them without knowing which protocol worker produced them.

use serde::{Deserialize, Serialize};

/// Root event enum for all application events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// Transport connection events
    Connection(ConnectionEvent),
    /// Device state and position
    Machine(MachineEvent),
    /// Batch run progress
    Batch(BatchEvent),
    /// Jog session lifecycle
    Jog(JogEvent),
    /// Raw line traffic
    Communication(CommunicationEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Machine(_) => EventCategory::Machine,
            AppEvent::Batch(_) => EventCategory::Batch,
            AppEvent::Jog(_) => EventCategory::Jog,
            AppEvent::Communication(_) => EventCategory::Communication,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Machine(e) => e.description(),
            AppEvent::Batch(e) => e.description(),
            AppEvent::Jog(e) => e.description(),
            AppEvent::Communication(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Transport connection events.
    Connection,
    /// Device state and position events.
    Machine,
    /// Batch run events.
    Batch,
    /// Jog session events.
    Jog,
    /// Line traffic events.
    Communication,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Machine => write!(f, "Machine"),
            EventCategory::Batch => write!(f, "Batch"),
            EventCategory::Jog => write!(f, "Jog"),
            EventCategory::Communication => write!(f, "Communication"),
        }
    }
}

/// Connection-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Transport opened.
    Connected {
        /// Port (or simulator) name.
        port: String,
    },
    /// Transport closed or lost.
    Disconnected {
        /// Port (or simulator) name.
        port: String,
        /// Why the transport went away.
        reason: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Connected { port } => format!("Connected to {}", port),
            ConnectionEvent::Disconnected { port, reason } => {
                format!("Disconnected from {}: {}", port, reason)
            }
        }
    }
}

/// Device state and position events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MachineEvent {
    /// A status line was parsed into the device status model.
    StatusUpdated {
        /// Device state token (Idle, Run, Jog, Alarm, ...).
        state: String,
        /// Machine X position, if reported.
        x: Option<f64>,
        /// Machine Y position, if reported.
        y: Option<f64>,
        /// Machine Z position, if reported.
        z: Option<f64>,
    },
}

impl MachineEvent {
    fn description(&self) -> String {
        match self {
            MachineEvent::StatusUpdated { state, x, y, z } => {
                let axis = |v: &Option<f64>| v.map_or("-".to_string(), |v| format!("{:.3}", v));
                format!("{} X{} Y{} Z{}", state, axis(x), axis(y), axis(z))
            }
        }
    }
}

/// Batch run events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchEvent {
    /// A batch run started.
    Started {
        /// Number of primary commands.
        total: usize,
    },
    /// A primary command is about to be sent.
    Progress {
        /// Zero-based index of the command.
        index: usize,
        /// Number of primary commands.
        total: usize,
    },
    /// The abort flag was observed; abort commands follow.
    AbortRequested {
        /// Primary commands already sent.
        sent: usize,
    },
    /// The run ended (normally, aborted, or on a transport failure).
    Finished {
        /// Primary commands sent.
        sent: usize,
        /// Whether the abort sequence ran.
        aborted: bool,
    },
}

impl BatchEvent {
    fn description(&self) -> String {
        match self {
            BatchEvent::Started { total } => format!("Batch started ({} commands)", total),
            BatchEvent::Progress { index, total } => format!("Batch {}/{}", index + 1, total),
            BatchEvent::AbortRequested { sent } => format!("Batch abort after {} commands", sent),
            BatchEvent::Finished { sent, aborted } => {
                format!("Batch finished: {} sent, aborted={}", sent, aborted)
            }
        }
    }
}

/// Jog session events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JogEvent {
    /// A press engaged a new session.
    SessionStarted {
        /// The jog command the session repeats.
        command: String,
        /// Computed feed rate.
        feed_rate: f64,
    },
    /// The press was released; waiting for motion to end.
    Releasing,
    /// The session stopped and released the transport.
    Stopped {
        /// Jog commands acknowledged during the session.
        moves: u64,
    },
}

impl JogEvent {
    fn description(&self) -> String {
        match self {
            JogEvent::SessionStarted { command, feed_rate } => {
                format!("Jog started: {} (F{})", command, feed_rate)
            }
            JogEvent::Releasing => "Jog releasing".to_string(),
            JogEvent::Stopped { moves } => format!("Jog stopped after {} moves", moves),
        }
    }
}

/// Line traffic events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommunicationEvent {
    /// A command line was sent.
    LineSent {
        /// The command text, without terminator.
        line: String,
    },
    /// A response line was received.
    LineReceived {
        /// The response text.
        line: String,
    },
    /// A single-command exchange gave up waiting for "ok".
    AckTimeout {
        /// The command that timed out.
        command: String,
    },
}

impl CommunicationEvent {
    fn description(&self) -> String {
        let truncate = |data: &str| {
            if data.chars().count() > 50 {
                format!("{}...", data.chars().take(50).collect::<String>())
            } else {
                data.to_string()
            }
        };
        match self {
            CommunicationEvent::LineSent { line } => format!("TX: {}", truncate(line)),
            CommunicationEvent::LineReceived { line } => format!("RX: {}", truncate(line)),
            CommunicationEvent::AckTimeout { command } => format!("Timeout: {}", command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            AppEvent::Jog(JogEvent::Releasing).category(),
            EventCategory::Jog
        );
        assert_eq!(
            AppEvent::Batch(BatchEvent::Started { total: 3 }).category(),
            EventCategory::Batch
        );
    }

    #[test]
    fn test_status_description() {
        let event = MachineEvent::StatusUpdated {
            state: "Idle".to_string(),
            x: Some(1.0),
            y: None,
            z: Some(-2.5),
        };
        assert_eq!(event.description(), "Idle X1.000 Y- Z-2.500");
    }

    #[test]
    fn test_long_line_is_truncated() {
        let line = "G1 ".repeat(40);
        let event = CommunicationEvent::LineSent { line };
        let text = event.description();
        assert!(text.ends_with("..."));
        assert!(text.len() < 60);
    }
}
