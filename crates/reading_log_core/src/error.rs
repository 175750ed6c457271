//! crates/reading_log_core/src/error.rs
//!
//! Caller-facing error taxonomy for the synchronous (callable) operations.

use crate::ports::PortError;

/// Errors surfaced to callers of the callable operations.
///
/// Every variant carries a human-readable message and maps to a stable kind tag
/// through [`ServiceError::kind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input. Raised before any side effect.
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{message}")]
    RateExceeded { message: String, retry_after_secs: u64 },

    /// The request is well-formed but the current state forbids it.
    #[error("{0}")]
    Precondition(String),

    /// An unexpected store failure. The message is generic and safe to show.
    #[error("{0}")]
    Internal(String),
}

/// A convenience type alias for `Result<T, ServiceError>`.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// The stable error-kind tag sent to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "INVALID_ARGUMENT",
            ServiceError::Unauthenticated(_) => "UNAUTHENTICATED",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::PermissionDenied(_) => "PERMISSION_DENIED",
            ServiceError::RateExceeded { .. } => "RATE_EXCEEDED",
            ServiceError::Precondition(_) => "FAILED_PRECONDITION",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }
}

/// Outcome of one step inside a callable operation: a rejection meant for the
/// caller, or a store failure that must be logged and masked as `Internal`.
#[derive(Debug)]
pub(crate) enum StepError {
    Rejected(ServiceError),
    Store(PortError),
}

impl From<PortError> for StepError {
    fn from(e: PortError) -> Self {
        StepError::Store(e)
    }
}

impl From<ServiceError> for StepError {
    fn from(e: ServiceError) -> Self {
        StepError::Rejected(e)
    }
}
