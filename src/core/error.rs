use std::io;
use std::time::Duration;
use thiserror::Error;

/// Custom error types for the vehicle link
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out: {0}")]
    ConnectionTimeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Heartbeat send failed: {0}")]
    HeartbeatTimeout(String),

    #[error("Command {command} timed out after {elapsed:?}")]
    CommandTimeout {
        /// Numeric command id that never got an acknowledgment
        command: u16,
        /// Time spent waiting before giving up
        elapsed: Duration,
    },

    #[error("Command {command} rejected with result {result}")]
    CommandRejected {
        /// Numeric command id the vehicle rejected
        command: u16,
        /// Acknowledgment result code reported by the vehicle
        result: String,
    },

    #[error("Command {command} cancelled by caller")]
    CommandCancelled {
        /// Numeric command id whose wait was cancelled
        command: u16,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new connection-failed error
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Error::ConnectionFailed(msg.into())
    }

    /// Creates a new connection-timeout error
    pub fn connection_timeout(msg: impl Into<String>) -> Self {
        Error::ConnectionTimeout(msg.into())
    }

    /// Creates a new connection-lost error
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Error::ConnectionLost(msg.into())
    }

    /// Creates a new heartbeat error
    pub fn heartbeat_timeout(msg: impl Into<String>) -> Self {
        Error::HeartbeatTimeout(msg.into())
    }

    /// Creates a new command-timeout error
    pub fn command_timeout(command: u16, elapsed: Duration) -> Self {
        Error::CommandTimeout { command, elapsed }
    }

    /// Creates a new command-rejected error
    pub fn command_rejected(command: u16, result: impl Into<String>) -> Self {
        Error::CommandRejected {
            command,
            result: result.into(),
        }
    }

    /// Creates a new invalid-parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Creates a new data-unavailable error
    pub fn data_unavailable(msg: impl Into<String>) -> Self {
        Error::DataUnavailable(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Remediation hint attached to connection failures, listing what an
    /// operator should check when the vehicle endpoint is unreachable.
    pub fn connection_hint(endpoint: impl std::fmt::Display) -> String {
        format!(
            "failed to reach {endpoint}; check that the SITL/vehicle is running, \
             the port is correct, and no firewall is blocking the link"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::connection_lost("not connected");
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(err.to_string(), "Connection lost: not connected");
    }

    #[test]
    fn test_command_timeout_display() {
        let err = Error::command_timeout(400, Duration::from_millis(5000));
        assert!(matches!(err, Error::CommandTimeout { command: 400, .. }));
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
