//! # Live Audio Sessions
//!
//! Real-time duplex voice conversations with the remote coaching agent.
//!
//! ## Module Organization:
//! - **pcm**: f32 ⇄ 16-bit PCM framing and base64 payloads
//! - **scheduler**: back-to-back playback scheduling and barge-in flush
//! - **protocol**: wire messages and transport events
//! - **transport**: the `Transport` seam and its WebSocket implementation
//! - **session**: one session's state machine and event loop
//! - **controller**: start/stop/status for the control surface
//! - **status**, **metrics**, **error**: shared types

pub mod controller;
pub mod error;
pub mod metrics;
pub mod pcm;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod transport;

pub use controller::LiveController;
pub use error::LiveError;
pub use metrics::LiveMetrics;
pub use status::{SessionState, SessionStatus};
