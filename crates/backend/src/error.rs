//! Error taxonomy shared across the session client and the relay.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No response reached the backend at all. Never conflated with an
    /// authenticated-but-rejected response.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected the credential.
    #[error("unauthorized")]
    Unauthorized,

    /// The backend rejected the request body or payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backend accepted the call but the write did not happen.
    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("not found")]
    NotFound,
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// Map an HTTP status from the hosted backend onto the error taxonomy.
    pub fn from_status(status: reqwest::StatusCode, detail: String) -> Self {
        match status.as_u16() {
            401 | 403 => BackendError::Unauthorized,
            404 => BackendError::NotFound,
            400 | 409 | 422 => BackendError::Validation(detail),
            _ => BackendError::Persistence(detail),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        // Status-carrying errors are mapped where the response is inspected;
        // anything surfacing through this path never reached the backend.
        match err.status() {
            Some(status) => BackendError::from_status(status, err.to_string()),
            None => BackendError::Network(err.to_string()),
        }
    }
}
