//! # Session Status
//!
//! Observable lifecycle state of a live session, published to the UI layer
//! through a `tokio::sync::watch` channel.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: nothing started yet
//! 2. **Connecting**: devices acquired, transport opening
//! 3. **Active**: transport ready, audio flowing both ways
//! 4. **Closed**: stopped or failed (terminal for this session id)

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }

    /// Whether a session in this state still holds resources.
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    /// Forward transitions allowed by the lifecycle.
    ///
    /// `Closed` is reachable from everywhere; nothing leaves `Closed`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Connecting)
                | (SessionState::Connecting, SessionState::Active)
                | (SessionState::Idle, SessionState::Closed)
                | (SessionState::Connecting, SessionState::Closed)
                | (SessionState::Active, SessionState::Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot rendered by the UI: the three flags plus context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: Option<String>,
    pub state: SessionState,
    pub connecting: bool,
    pub active: bool,
    pub speaking: bool,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            state: SessionState::Idle,
            connecting: false,
            active: false,
            speaking: false,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Fresh status for a newly started session.
    pub fn for_session(session_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            ..Self::idle()
        }
    }

    /// Move to `state`, keeping the derived flags consistent.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.connecting = state == SessionState::Connecting;
        self.active = state == SessionState::Active;
        if state != SessionState::Active {
            self.speaking = false;
        }
        self.updated_at = Utc::now();
    }

    pub fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking && self.active;
        self.updated_at = Utc::now();
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::idle()
    }
}
