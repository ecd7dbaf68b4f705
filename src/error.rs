//! # Error Handling
//!
//! HTTP-facing error type for the control surface and its conversion into
//! JSON error responses.
//!
//! ## Error Categories:
//! - **Internal / ConfigError** → 500
//! - **BadRequest / ValidationError** → 400
//! - **NotFound** → 404
//! - **Conflict** → 409 (a live session is already running)
//! - **Unavailable** → 503 (the live agent cannot be reached or is not configured)
//!
//! Session-level failures are [`LiveError`]s; they are mapped here when they
//! surface through a handler.

use crate::live::LiveError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    Conflict(String),
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::ConfigError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.as_str())
            }
            AppError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.as_str())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.as_str()),
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.as_str())
            }
        }
    }
}

/// Every error renders as:
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "a live session is already running",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed request bodies are the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<LiveError> for AppError {
    fn from(err: LiveError) -> Self {
        match err {
            LiveError::AlreadyRunning => AppError::Conflict(err.to_string()),
            LiveError::MissingApiKey | LiveError::Transport(_) => {
                AppError::Unavailable(err.to_string())
            }
            LiveError::Protocol(_) | LiveError::Decode(_) => AppError::BadRequest(err.to_string()),
            LiveError::PermissionDenied(_)
            | LiveError::Device(_)
            | LiveError::InvalidTransition { .. } => AppError::Internal(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
