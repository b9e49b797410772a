//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or (de)serializing protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An entry was built without any mutation.
    #[error("entry for row {row_key:?} has no mutations")]
    EmptyEntry {
        /// Row key of the rejected entry.
        row_key: String,
    },

    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Deserialization failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame header announced more bytes than allowed.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced frame length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// The input ended in the middle of a frame.
    #[error("truncated frame")]
    TruncatedFrame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::EmptyEntry {
            row_key: "r1".into(),
        };
        assert_eq!(err.to_string(), "entry for row \"r1\" has no mutations");

        let err = ProtocolError::FrameTooLarge { len: 10, max: 4 };
        assert!(err.to_string().contains("10"));
    }
}
