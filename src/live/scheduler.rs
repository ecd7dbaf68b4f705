//! # Playback Scheduling
//!
//! Places each decoded output buffer immediately after the previous one using a
//! single playback cursor. This is not a jitter buffer: it only guarantees that
//! buffers play back-to-back, in arrival order, without overlapping.
//!
//! ## Algorithm:
//! - `start = max(cursor, now)` where `now` is the sink's playback clock
//! - `cursor = start + duration`
//! - An interruption flushes every outstanding buffer and resets the cursor to 0,
//!   so the next buffer schedules relative to "now" instead of stale future time
//!
//! ## Outstanding Buffers:
//! Buffers are tracked in an arena keyed by an opaque [`BufferId`]. The sink
//! reports completion by id, and completion of an id that was already flushed
//! is simply ignored.

use std::collections::BTreeMap;
use std::fmt;

/// Opaque handle of a scheduled playback buffer.
///
/// Ids increase in arrival order, which the arena relies on for flush order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf-{}", self.0)
    }
}

/// A buffer placed on the playback timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    /// Absolute start time on the sink's clock (seconds)
    pub start_at: f64,
    /// Playback duration (seconds)
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    next_id: u64,
    outstanding: BTreeMap<BufferId, ScheduledBuffer>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next playback start time. Zero right after creation or an interruption.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Place a buffer of `duration` seconds given the sink clock `now`.
    ///
    /// ## Ordering:
    /// The returned start time is never earlier than the end of the previously
    /// scheduled buffer, regardless of how late or early `now` is.
    pub fn schedule(&mut self, duration: f64, now: f64) -> ScheduledBuffer {
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let start_at = self.cursor.max(now);

        let id = BufferId(self.next_id);
        self.next_id += 1;

        let buffer = ScheduledBuffer { id, start_at, duration };
        self.cursor = buffer.end_at();
        self.outstanding.insert(id, buffer);
        buffer
    }

    /// Mark a buffer as finished. Returns `false` if it was not outstanding.
    pub fn complete(&mut self, id: BufferId) -> bool {
        self.outstanding.remove(&id).is_some()
    }

    /// Flush all outstanding buffers and reset the cursor.
    ///
    /// Returns the flushed buffers in arrival order so the caller can stop them
    /// on the sink. Safe to call with nothing outstanding.
    pub fn interrupt(&mut self) -> Vec<ScheduledBuffer> {
        let flushed = std::mem::take(&mut self.outstanding)
            .into_values()
            .collect();
        self.cursor = 0.0;
        flushed
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
    }
}
