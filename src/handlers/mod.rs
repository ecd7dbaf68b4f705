pub mod config;
pub mod live;

pub use self::config::*;
pub use self::live::*;

use crate::error::{AppError, AppResult};
use actix_web::{HttpRequest, HttpResponse};

/// Fallback for unknown routes, so clients get the usual JSON error body.
pub async fn not_found(req: HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}
