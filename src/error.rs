use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    /// The counter store could not be reached or did not answer in time.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// Missing or invalid startup configuration. Fatal.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GuardError>;

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        GuardError::StoreUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for GuardError {
    fn from(err: validator::ValidationErrors) -> Self {
        GuardError::Validation(err.to_string())
    }
}

impl From<envconfig::Error> for GuardError {
    fn from(err: envconfig::Error) -> Self {
        GuardError::Configuration(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_guard_error(err: &GuardError) -> Self {
        match err {
            GuardError::StoreUnavailable(msg) => Self::new("service_unavailable", msg, 503),
            GuardError::Configuration(msg) => Self::new("configuration_error", msg, 500),
            GuardError::Validation(msg) => Self::new("validation_error", msg, 422),
            GuardError::Io(err) => Self::new("internal_error", &err.to_string(), 500),
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_guard_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
