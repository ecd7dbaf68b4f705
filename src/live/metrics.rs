//! Process-wide counters for live sessions, reported by the health and status
//! endpoints.

use serde::Serialize;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LiveMetrics {
    pub sessions_started: u64,
    pub sessions_failed: u64,
    /// Outbound media chunks handed to the transport
    pub frames_sent: u64,
    /// Inbound audio chunks scheduled for playback
    pub frames_received: u64,
    pub decode_errors: u64,
    pub interruptions: u64,
}

pub type SharedMetrics = Arc<RwLock<LiveMetrics>>;

pub fn shared() -> SharedMetrics {
    Arc::new(RwLock::new(LiveMetrics::default()))
}

/// Apply `update` under the write lock. A poisoned lock still holds valid
/// counters, so it is recovered rather than propagated.
pub fn record(metrics: &SharedMetrics, update: impl FnOnce(&mut LiveMetrics)) {
    let mut guard = metrics.write().unwrap_or_else(|e| e.into_inner());
    update(&mut guard);
}

pub fn snapshot(metrics: &SharedMetrics) -> LiveMetrics {
    metrics.read().unwrap_or_else(|e| e.into_inner()).clone()
}
