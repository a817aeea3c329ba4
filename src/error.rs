use axum::http::StatusCode;
use thiserror::Error;

/// Error taxonomy for the service. Everything is scoped to the triggering
/// request; nothing here is fatal to the process.
#[derive(Debug, Error)]
pub enum BokmerkeError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("provider not allowed: {0}")]
    ProviderNotAllowed(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl BokmerkeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BokmerkeError::Unauthenticated => StatusCode::UNAUTHORIZED,
            BokmerkeError::ProviderNotAllowed(_) => StatusCode::FORBIDDEN,
            BokmerkeError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        }
    }
}
