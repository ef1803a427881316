//! Error types for the proxyport-core library.

use std::time::Duration;

use thiserror::Error;

use crate::domain::InvalidPort;

/// Result type alias for proxyport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconfiguring the proxy's listening port.
#[derive(Error, Debug)]
pub enum Error {
    /// The candidate port was rejected by validation.
    #[error("Invalid port: {0}")]
    InvalidPort(#[from] InvalidPort),

    /// The authoritative configuration is missing or malformed.
    #[error("Configuration unreadable: {0}")]
    ConfigUnreadable(String),

    /// A staged configuration could not be written durably.
    #[error("Failed to persist configuration: {0}")]
    PersistFailure(String),

    /// The service run state could not be determined.
    #[error("Service status unknown: {0}")]
    StatusUnknown(String),

    /// The service did not adopt the new port.
    #[error("Service failed to apply new port: {0}")]
    ApplyFailure(String),

    /// Restarting the service on its previous port failed.
    #[error("Service recovery failed: {0}")]
    RecoveryFailure(String),

    /// A blocking step exceeded its time bound.
    #[error("{operation} timed out after {}s", after.as_secs_f32())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Another reconfiguration is already in flight.
    #[error("Another port change is already in progress")]
    Busy,

    /// The user aborted before anything was changed.
    #[error("Cancelled before any change was made")]
    Cancelled,

    /// Tool settings could not be loaded or saved.
    #[error("Settings error: {0}")]
    Settings(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InvalidPortReason;

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            operation: "service start",
            after: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "service start timed out after 10s");
    }

    #[test]
    fn test_invalid_port_converts() {
        let err: Error = InvalidPort::new(InvalidPortReason::OutOfRange).into();
        assert!(err.to_string().contains("out of range"));
    }
}
