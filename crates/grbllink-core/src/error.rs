//! Error handling for GRBLLink
//!
//! Provides error types for the layers of the application:
//! - Protocol errors (acknowledgment flow control, subscriber registry, jog)
//! - Connection errors (transport/serial communication)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Protocol error type
///
/// Represents violations of the line-oriented command/acknowledgment
/// protocol and of the single-subscriber transport discipline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A command was issued while the previous one is still unacknowledged
    #[error("Command issued with an acknowledgment outstanding (issued {issued}, completed {completed})")]
    CommandOutstanding {
        /// Commands issued so far.
        issued: u64,
        /// Acknowledgments observed so far.
        completed: u64,
    },

    /// The transport already has a receive handler registered
    #[error("Transport receive handler already held by {holder}")]
    SubscriberBusy {
        /// Label of the current holder.
        holder: String,
    },

    /// No acknowledgment arrived within the wait budget
    #[error("Acknowledgment timed out after {timeout_ms}ms")]
    AckTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The operation was cancelled before it finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Command text cannot be sent as a single line
    #[error("Invalid command: {reason}")]
    InvalidCommand {
        /// The reason the command was rejected.
        reason: String,
    },

    /// Jog speed outside the slider domain
    #[error("Jog speed {value} outside {min}..={max}")]
    InvalidJogSpeed {
        /// Requested slider value.
        value: u32,
        /// Lowest accepted slider value.
        min: u32,
        /// Highest accepted slider value.
        max: u32,
    },
}

/// Connection error type
///
/// Represents errors related to communication with the controller over the
/// serial transport.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Transport is not connected
    #[error("Transport not connected")]
    NotConnected,

    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Main error type for GRBLLink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::AckTimeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_conversion() {
        let err: Error = ProtocolError::CommandOutstanding {
            issued: 2,
            completed: 1,
        }
        .into();
        assert!(err.is_protocol_error());
        assert!(!err.is_connection_error());
        assert!(err.to_string().contains("issued 2"));
    }

    #[test]
    fn test_timeout_predicate() {
        let err: Error = ProtocolError::AckTimeout { timeout_ms: 1000 }.into();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Acknowledgment timed out after 1000ms");
    }

    #[test]
    fn test_io_error_is_connection_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_connection_error());
    }
}
