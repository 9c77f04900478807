use thiserror::Error;

/// Failures that callers can act on.
///
/// Services return these wrapped in `anyhow::Error`; the HTTP layer
/// downcasts to pick the status code. Anything else is an operation
/// failure.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
}

impl ServiceError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ServiceError::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }
}
