//! Error types for the admission and dispatch core.
//!
//! Errors are cheap to clone so a failed batch item can be stored in its
//! result slot and handed back every time that slot is read.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failure taxonomy for a dispatched request.
///
/// Retryability is not a property of the variant alone: `Service` errors are
/// retried only when their code appears in the policy's retryable set, while
/// `Transport` and `Timeout` failures are always considered transient. See
/// [`crate::retry::classify`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Caller misuse, such as a single debit exceeding the whole per-minute
    /// budget. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Network-level failure from the injected transport.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Structured failure reported by the remote service.
    #[error("service error {code}: {message}")]
    Service { code: i64, message: String },

    /// A single attempt ran past its configured deadline.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The authentication credential has expired and must be refreshed.
    #[error("authentication credential expired")]
    AuthExpired,

    /// All retry attempts were consumed; wraps the final transient failure.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<DispatchError>,
    },

    /// The token budget could not be satisfied within the bounded number of
    /// window waits.
    #[error("token budget unavailable: {0}")]
    ResourceExhausted(String),

    /// The request's batch was cancelled before this item finished.
    #[error("request cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a service error with the remote code.
    pub fn service(code: i64, message: impl Into<String>) -> Self {
        Self::Service {
            code,
            message: message.into(),
        }
    }

    /// The remote service code, if this error carries one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Service { code, .. } => Some(*code),
            Self::RetryExhausted { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Whether this error wraps an exhausted retry budget.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}
