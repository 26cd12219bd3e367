//! Protocol error types

use thiserror::Error;

/// Wire-level errors raised while decoding UVC descriptors and control blocks
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A structure is shorter than its validated prefix requires
    #[error("{what} truncated: needed {needed} bytes, got {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// A descriptor declares a length that cannot be walked
    #[error("Invalid descriptor length {length} at offset {offset}")]
    InvalidLength { length: usize, offset: usize },

    /// A field holds a value that contradicts the rest of the structure
    #[error("Invalid {what}: {reason}")]
    InvalidField { what: &'static str, reason: String },

    /// A descriptor of another subtype was found where one was required
    #[error("Unexpected descriptor subtype {found:#04x} (expected {expected:#04x})")]
    UnexpectedSubtype { expected: u8, found: u8 },

    /// I/O error while encoding into a writer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Shorthand for an [`ProtocolError::InvalidField`] error
    pub fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            what,
            reason: reason.into(),
        }
    }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
