//! # Host Audio Devices
//!
//! The microphone and speaker are provided by the host environment. The
//! session only sees these traits:
//! - **CaptureSource**: delivers fixed-size f32 blocks at the capture rate
//! - **PlaybackSink**: plays decoded buffers at absolute times on its own
//!   clock and reports completion by [`BufferId`]
//! - **AudioHost**: acquires both for a session
//!
//! The WAV backend (`wav.rs`) captures from a file paced in real time and
//! renders playback onto a timeline that is saved when the sink closes.

pub mod wav;

use crate::live::error::LiveError;
use crate::live::scheduler::BufferId;
use thiserror::Error;
use tokio::sync::mpsc;

pub use self::wav::WavHost;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported audio format: {0}")]
    Format(String),

    #[error("{0} is not playing")]
    NotPlaying(BufferId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HostError> for LiveError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::PermissionDenied(msg) => LiveError::PermissionDenied(msg),
            other => LiveError::Device(other.to_string()),
        }
    }
}

/// Channel on which a sink reports finished buffers.
pub type PlaybackCompletions = mpsc::UnboundedSender<BufferId>;

pub trait CaptureSource: Send {
    fn sample_rate(&self) -> u32;

    fn block_size(&self) -> usize;

    /// Begin delivering blocks. Blocks stop when the receiver is dropped or
    /// the source is closed.
    fn start(&mut self, blocks: mpsc::Sender<Vec<f32>>) -> Result<(), HostError>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

pub trait PlaybackSink: Send {
    fn sample_rate(&self) -> u32;

    /// Current playback clock in seconds since the sink was opened.
    fn current_time(&self) -> f64;

    /// Queue `samples` to start at `start_at` on the playback clock.
    fn play(&mut self, id: BufferId, samples: Vec<f32>, start_at: f64) -> Result<(), HostError>;

    /// Stop a buffer early. Returns [`HostError::NotPlaying`] if it already
    /// finished or was never queued.
    fn stop_buffer(&mut self, id: BufferId) -> Result<(), HostError>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

pub trait AudioHost: Send + Sync {
    fn open_capture(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn CaptureSource>, HostError>;

    fn open_playback(
        &self,
        label: &str,
        sample_rate: u32,
        completions: PlaybackCompletions,
    ) -> Result<Box<dyn PlaybackSink>, HostError>;
}

/// In-memory devices with a hand-driven clock.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct SinkLog {
        /// (id, sample count, start time)
        pub played: Vec<(BufferId, usize, f64)>,
        pub stopped: Vec<BufferId>,
        pub finished: HashSet<BufferId>,
        pub closed: usize,
    }

    #[derive(Debug, Default)]
    pub struct CaptureLog {
        pub started: bool,
        pub closed: usize,
        pub blocks: Option<mpsc::Sender<Vec<f32>>>,
    }

    #[derive(Clone, Default)]
    pub struct FakeHost {
        pub clock: Arc<Mutex<f64>>,
        pub sink: Arc<Mutex<SinkLog>>,
        pub capture: Arc<Mutex<CaptureLog>>,
        pub deny_capture: bool,
        pub completions: Arc<Mutex<Option<PlaybackCompletions>>>,
    }

    impl FakeHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn denying_capture() -> Self {
            Self {
                deny_capture: true,
                ..Self::default()
            }
        }

        pub fn set_time(&self, seconds: f64) {
            *self.clock.lock().unwrap() = seconds;
        }

        pub fn sink(&self) -> FakeSink {
            FakeSink {
                clock: self.clock.clone(),
                log: self.sink.clone(),
            }
        }

        pub fn capture(&self) -> FakeCapture {
            FakeCapture {
                log: self.capture.clone(),
            }
        }

        /// Pretend the speaker finished `id` on its own.
        pub fn finish(&self, id: BufferId) {
            self.sink.lock().unwrap().finished.insert(id);
            if let Some(tx) = self.completions.lock().unwrap().as_ref() {
                let _ = tx.send(id);
            }
        }

        pub fn played(&self) -> Vec<(BufferId, usize, f64)> {
            self.sink.lock().unwrap().played.clone()
        }

        pub fn capture_sender(&self) -> Option<mpsc::Sender<Vec<f32>>> {
            self.capture.lock().unwrap().blocks.clone()
        }
    }

    impl AudioHost for FakeHost {
        fn open_capture(
            &self,
            _sample_rate: u32,
            _block_size: usize,
        ) -> Result<Box<dyn CaptureSource>, HostError> {
            if self.deny_capture {
                return Err(HostError::PermissionDenied("microphone access denied".to_string()));
            }
            Ok(Box::new(self.capture()))
        }

        fn open_playback(
            &self,
            _label: &str,
            _sample_rate: u32,
            completions: PlaybackCompletions,
        ) -> Result<Box<dyn PlaybackSink>, HostError> {
            *self.completions.lock().unwrap() = Some(completions);
            Ok(Box::new(self.sink()))
        }
    }

    pub struct FakeSink {
        clock: Arc<Mutex<f64>>,
        log: Arc<Mutex<SinkLog>>,
    }

    impl PlaybackSink for FakeSink {
        fn sample_rate(&self) -> u32 {
            crate::live::pcm::PLAYBACK_SAMPLE_RATE
        }

        fn current_time(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn play(
            &mut self,
            id: BufferId,
            samples: Vec<f32>,
            start_at: f64,
        ) -> Result<(), HostError> {
            self.log.lock().unwrap().played.push((id, samples.len(), start_at));
            Ok(())
        }

        fn stop_buffer(&mut self, id: BufferId) -> Result<(), HostError> {
            let mut log = self.log.lock().unwrap();
            if log.finished.contains(&id) {
                return Err(HostError::NotPlaying(id));
            }
            log.stopped.push(id);
            Ok(())
        }

        fn close(&mut self) {
            self.log.lock().unwrap().closed += 1;
        }
    }

    pub struct FakeCapture {
        log: Arc<Mutex<CaptureLog>>,
    }

    impl CaptureSource for FakeCapture {
        fn sample_rate(&self) -> u32 {
            crate::live::pcm::CAPTURE_SAMPLE_RATE
        }

        fn block_size(&self) -> usize {
            4
        }

        fn start(&mut self, blocks: mpsc::Sender<Vec<f32>>) -> Result<(), HostError> {
            let mut log = self.log.lock().unwrap();
            log.started = true;
            log.blocks = Some(blocks);
            Ok(())
        }

        fn close(&mut self) {
            let mut log = self.log.lock().unwrap();
            log.closed += 1;
            log.blocks = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_errors_keep_their_kind() {
        let err: LiveError = HostError::PermissionDenied("mic".to_string()).into();
        assert!(matches!(err, LiveError::PermissionDenied(_)));

        let err: LiveError = HostError::Format("stereo".to_string()).into();
        assert!(matches!(err, LiveError::Device(_)));
    }
}
