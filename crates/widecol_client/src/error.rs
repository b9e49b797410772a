//! Error types for the bulk mutation client.

use thiserror::Error;
use widecol_protocol::{ProtocolError, Status, StatusCode};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while applying mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The stream could not be opened, sent on, or finished with a
    /// non-`Ok` status.
    #[error("rpc failed: {0}")]
    Rpc(Status),

    /// Encoding or decoding a message failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The retry budget ran out while the last attempt still failed.
    #[error("retries exhausted after {attempts} attempts, last status: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Status of the final attempt.
        last: Status,
    },
}

impl ClientError {
    /// Creates an `Rpc` error from a code and message.
    pub fn rpc(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Rpc(Status::new(code, message))
    }

    /// Returns the status code carried by the error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Rpc(status) => Some(status.code),
            ClientError::RetriesExhausted { last, .. } => Some(last.code),
            _ => None,
        }
    }

    /// Returns true if the failed attempt may be worth repeating under the
    /// default retryability rules.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Rpc(status) if status.code == StatusCode::Unavailable)
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        Self::Rpc(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::rpc(StatusCode::Unavailable, "connection reset").is_retryable());
        assert!(!ClientError::rpc(StatusCode::PermissionDenied, "nope").is_retryable());
        assert!(!ClientError::InvalidConfig("empty".into()).is_retryable());
        assert!(!ClientError::RetriesExhausted {
            attempts: 3,
            last: StatusCode::Unavailable.into(),
        }
        .is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::rpc(StatusCode::Unavailable, "try later");
        assert_eq!(err.to_string(), "rpc failed: UNAVAILABLE: try later");
        assert_eq!(err.status_code(), Some(StatusCode::Unavailable));

        let err = ClientError::RetriesExhausted {
            attempts: 4,
            last: StatusCode::DeadlineExceeded.into(),
        };
        assert!(err.to_string().contains("4"));
        assert!(err.to_string().contains("DEADLINE_EXCEEDED"));
    }
}
