//! Errors surfaced at the service boundary.
//!
//! Every [`StoreError`] is mapped onto [`ServiceError`] before it leaves a
//! [`ResourceService`](super::ResourceService), so callers only ever deal with the taxonomy
//! below and its HTTP status.

use crate::store::{InvalidIdentifier, StoreError};

/// Malformed or missing input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// Client fault: the payload is absent, unparseable or breaks a field rule.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Client fault: the path identifier is not a well-formed identifier.
    #[error("Invalid ID: {0}")]
    InvalidIdentifier(String),

    /// No document carries the identifier.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

impl ServiceError {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) | ServiceError::InvalidIdentifier(_) => 400,
            ServiceError::NotFound { .. } => 404,
            ServiceError::StoreUnavailable(_)
            | ServiceError::WriteRejected(_)
            | ServiceError::TransactionFailed(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Validation(err.0)
    }
}

impl From<InvalidIdentifier> for ServiceError {
    fn from(err: InvalidIdentifier) -> Self {
        ServiceError::InvalidIdentifier(err.0)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ServiceError::StoreUnavailable(msg),
            StoreError::WriteRejected(msg) => ServiceError::WriteRejected(msg),
            StoreError::InvalidIdentifier(e) => ServiceError::InvalidIdentifier(e.0),
            // A document the store cannot hand back in its schema is an infrastructure fault.
            StoreError::Decode(msg) => ServiceError::StoreUnavailable(msg),
            e @ (StoreError::TransientConflict(_)
            | StoreError::UnknownTransaction(_)
            | StoreError::TransactionFailed { .. }) => ServiceError::TransactionFailed(e.to_string()),
        }
    }
}
