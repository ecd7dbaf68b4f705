//! Error taxonomy for live audio sessions.
//!
//! ## Severity:
//! - **PermissionDenied / Device**: fatal to session start, no retry
//! - **Transport**: fatal, triggers a full teardown, no reconnect
//! - **Decode**: per-frame, logged and counted, the session keeps running
//! - **Protocol**: a message could not be serialized or parsed

use crate::live::status::SessionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("audio capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode inbound audio: {0}")]
    Decode(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("no API key configured for the live agent")]
    MissingApiKey,

    #[error("a live session is already running")]
    AlreadyRunning,

    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

impl LiveError {
    /// Short machine-readable code used in status payloads.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::PermissionDenied(_) => "permission_denied",
            LiveError::Device(_) => "device_error",
            LiveError::Transport(_) => "transport_error",
            LiveError::Decode(_) => "decode_error",
            LiveError::Protocol(_) => "protocol_error",
            LiveError::MissingApiKey => "missing_api_key",
            LiveError::AlreadyRunning => "already_running",
            LiveError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}
