//! Common error types

use thiserror::Error;
use uvc_protocol::{ProtocolError, UsbError};

#[derive(Debug, Error)]
pub enum Error {
    /// Descriptor too short or carrying inconsistent fields
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// No queue, buffer or alternate setting available
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Device disconnected")]
    Disconnected,

    /// Operation invalid in the current stream or control state
    #[error("Cannot {operation} while {state}")]
    StateViolation {
        operation: &'static str,
        state: String,
    },

    /// Control lacks the capability required by the request
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Transport error: {0}")]
    Transport(#[from] UsbError),

    /// Lock acquisition or transfer wait exceeded its bound
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Status codes reported to the owner of the device function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotSupported,
    NoDevice,
    IllegalData,
    OutOfMemory,
    Permission,
    Timeout,
    Io,
}

impl Error {
    /// Collapse the error into the code surfaced to the collaborator
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Malformed(_) | Error::OutOfRange(_) | Error::Protocol(_) => {
                ErrorCode::IllegalData
            }
            Error::ResourceExhausted(_) => ErrorCode::OutOfMemory,
            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Disconnected | Error::Transport(UsbError::NoDevice) => ErrorCode::NoDevice,
            Error::StateViolation { .. } | Error::Permission(_) => ErrorCode::Permission,
            Error::Timeout(_) | Error::Transport(UsbError::Timeout) => ErrorCode::Timeout,
            Error::Transport(_) | Error::Config(_) | Error::Io(_) => ErrorCode::Io,
        }
    }

    /// True when the device is gone and retrying is pointless
    pub fn is_disconnect(&self) -> bool {
        self.code() == ErrorCode::NoDevice
    }

    pub fn state_violation(operation: &'static str, state: impl ToString) -> Self {
        Error::StateViolation {
            operation,
            state: state.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            Error::Malformed("short".into()).code(),
            ErrorCode::IllegalData
        );
        assert_eq!(Error::Disconnected.code(), ErrorCode::NoDevice);
        assert_eq!(
            Error::Transport(UsbError::NoDevice).code(),
            ErrorCode::NoDevice
        );
        assert_eq!(Error::Transport(UsbError::Pipe).code(), ErrorCode::Io);
        assert_eq!(
            Error::state_violation("start", "Open").code(),
            ErrorCode::Permission
        );
        assert_eq!(
            Error::ResourceExhausted("no queue".into()).code(),
            ErrorCode::OutOfMemory
        );
    }

    #[test]
    fn test_state_violation_display() {
        let err = Error::state_violation("resume", "Started");
        assert_eq!(err.to_string(), "Cannot resume while Started");
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: Error = ProtocolError::invalid("bmHint", "reserved bits").into();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!err.is_disconnect());
    }
}
