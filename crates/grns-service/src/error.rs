//! Service error taxonomy.
//!
//! Every operation returns one of these kinds; the HTTP layer maps them to
//! status codes without loss.

use grns_blob::BlobError;
use grns_core::cancel::Interrupt;
use grns_storage::StorageError;

/// Typed errors surfaced by the task service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input, unknown fields, range violations.
    #[error("{0}")]
    InvalidArgument(String),

    /// Entity id not present.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate id, cycle, or preconditions unmet.
    #[error("{0}")]
    Conflict(String),

    /// Missing or invalid token.
    #[error("{0}")]
    Unauthorized(String),

    /// Token lacks the admin role.
    #[error("{0}")]
    Forbidden(String),

    /// Heavy-request semaphore saturated or upload over cap.
    #[error("{0}")]
    ResourceExhausted(String),

    /// The client canceled the request.
    #[error("operation canceled")]
    Canceled,

    /// The server-side deadline was hit.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Unexpected failure.
    #[error("{0}")]
    Internal(String),
}

/// Convenience alias used throughout the service crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// The wire error code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` if this is a [`ServiceError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a [`ServiceError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => Self::NotFound(e.to_string()),
            StorageError::DuplicateId { .. }
            | StorageError::CycleDetected { .. }
            | StorageError::Conflict { .. } => Self::Conflict(e.to_string()),
            StorageError::Validation { .. } => Self::InvalidArgument(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<BlobError> for ServiceError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound { .. } => Self::NotFound(e.to_string()),
            BlobError::InvalidId { .. } => Self::InvalidArgument(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<Interrupt> for ServiceError {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::Canceled => Self::Canceled,
            Interrupt::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}
