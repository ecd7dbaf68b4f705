//! # Live Session
//!
//! One duplex audio conversation with the remote agent, driven by a single
//! tokio task.
//!
//! ## Event Loop:
//! `run` multiplexes four sources with `tokio::select!` (biased, in this order):
//! 1. **Stop signal**: unconditional teardown
//! 2. **Transport events**: `Opened`, `Frame`, `Error`, `Closed`
//! 3. **Capture blocks**: encoded and queued for transmission, only while Active
//! 4. **Playback completions**: finished buffers leave the outstanding arena
//!
//! The playback scheduler and the device handles are owned by this task, so
//! none of them need locking. Anything that arrives after teardown is a no-op.

use crate::config::AppConfig;
use crate::host::{AudioHost, CaptureSource, PlaybackSink};
use crate::live::error::LiveError;
use crate::live::metrics::{self, SharedMetrics};
use crate::live::pcm;
use crate::live::protocol::{InboundFrame, MediaChunk, SetupMessage, TransportEvent};
use crate::live::scheduler::{BufferId, PlaybackScheduler};
use crate::live::status::{SessionState, SessionStatus};
use crate::live::transport::{Transport, TransportHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Captured blocks buffered between the device and the session loop.
const CAPTURE_QUEUE_DEPTH: usize = 8;

/// Everything a session needs to know before it starts.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub session_id: String,
    pub setup: SetupMessage,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub block_size: usize,
}

impl SessionOptions {
    /// Options for a new session with a fresh id.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            setup: SetupMessage::audio(
                &config.live.model,
                &config.live.voice_name,
                &config.live.system_instruction,
            ),
            capture_sample_rate: config.audio.capture_sample_rate,
            playback_sample_rate: config.audio.playback_sample_rate,
            block_size: config.audio.capture_block_size,
        }
    }
}

/// Writes one session's updates into the shared status channel.
///
/// Updates are dropped once the published status belongs to a different
/// session or has already reached `Closed`, so a stale session can never
/// overwrite a newer one.
#[derive(Clone)]
pub struct StatusPublisher {
    session_id: String,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl StatusPublisher {
    pub fn new(session_id: impl Into<String>, status: Arc<watch::Sender<SessionStatus>>) -> Self {
        Self {
            session_id: session_id.into(),
            status,
        }
    }

    /// Apply `update` if this session still owns the status. `update` returns
    /// whether it changed anything, which decides if watchers are notified.
    pub fn update(&self, update: impl FnOnce(&mut SessionStatus) -> bool) -> bool {
        self.status.send_if_modified(|status| {
            if status.session_id.as_deref() != Some(self.session_id.as_str())
                || status.state == SessionState::Closed
            {
                return false;
            }
            update(status)
        })
    }
}

pub struct LiveSession {
    options: SessionOptions,
    state: SessionState,
    scheduler: PlaybackScheduler,
    capture: Option<Box<dyn CaptureSource>>,
    sink: Option<Box<dyn PlaybackSink>>,
    transport: Option<TransportHandle>,
    publisher: StatusPublisher,
    metrics: SharedMetrics,
}

impl LiveSession {
    pub fn new(
        options: SessionOptions,
        publisher: StatusPublisher,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            options,
            state: SessionState::Idle,
            scheduler: PlaybackScheduler::new(),
            capture: None,
            sink: None,
            transport: None,
            publisher,
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.options.session_id
    }

    /// Drive the session until it is stopped, the agent hangs up, or something
    /// fatal happens. Always ends in `Closed` with every resource released.
    pub async fn run(
        mut self,
        host: Arc<dyn AudioHost>,
        transport: Arc<dyn Transport>,
        mut stop: oneshot::Receiver<()>,
    ) {
        if let Err(e) = self.transition(SessionState::Connecting) {
            self.fail(e);
            return;
        }

        let (block_tx, mut blocks) = mpsc::channel::<Vec<f32>>(CAPTURE_QUEUE_DEPTH);
        let (completion_tx, mut completions) = mpsc::unbounded_channel::<BufferId>();
        let mut block_tx = Some(block_tx);

        if let Err(e) = self.acquire_devices(host.as_ref(), completion_tx) {
            self.fail(e);
            return;
        }

        let setup = self.options.setup.clone();
        let connected = tokio::select! {
            biased;
            _ = &mut stop => {
                debug!(session_id = %self.id(), "Stop requested while connecting");
                self.teardown(None);
                return;
            }
            result = transport.connect(&setup) => result,
        };

        let mut events = match connected {
            Ok((handle, events)) => {
                self.transport = Some(handle);
                events
            }
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => {
                    debug!(session_id = %self.id(), "Stop requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Opened) => {
                        if let Err(e) = self.on_opened(&mut block_tx) {
                            self.fail(e);
                            return;
                        }
                    }
                    Some(TransportEvent::Frame(frame)) => self.handle_frame(frame),
                    Some(TransportEvent::Error(message)) => {
                        self.fail(LiveError::Transport(message));
                        return;
                    }
                    Some(TransportEvent::Closed) | None => {
                        if self.state == SessionState::Connecting {
                            self.fail(LiveError::Transport(
                                "connection closed before setup completed".to_string(),
                            ));
                            return;
                        }
                        info!(session_id = %self.id(), "Live agent ended the session");
                        break;
                    }
                },
                Some(block) = blocks.recv(), if self.state == SessionState::Active => {
                    self.send_block(&block);
                }
                Some(id) = completions.recv() => self.handle_completion(id),
            }
        }

        self.teardown(None);
    }

    fn transition(&mut self, next: SessionState) -> Result<(), LiveError> {
        if !self.state.can_transition_to(next) {
            return Err(LiveError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(session_id = %self.id(), from = %self.state, to = %next, "Session transition");
        self.state = next;
        self.publisher.update(|status| {
            status.set_state(next);
            true
        });
        Ok(())
    }

    fn acquire_devices(
        &mut self,
        host: &dyn AudioHost,
        completions: mpsc::UnboundedSender<BufferId>,
    ) -> Result<(), LiveError> {
        let capture = host.open_capture(self.options.capture_sample_rate, self.options.block_size)?;
        debug!(
            sample_rate = capture.sample_rate(),
            block_size = capture.block_size(),
            "Capture source acquired"
        );
        self.capture = Some(capture);

        let sink = host.open_playback(self.id(), self.options.playback_sample_rate, completions)?;
        debug!(sample_rate = sink.sample_rate(), "Playback sink acquired");
        self.sink = Some(sink);
        Ok(())
    }

    /// The agent accepted the setup: go Active and start pulling capture blocks.
    fn on_opened(
        &mut self,
        block_tx: &mut Option<mpsc::Sender<Vec<f32>>>,
    ) -> Result<(), LiveError> {
        if self.state != SessionState::Connecting {
            trace!(session_id = %self.id(), "Ignoring repeated setup completion");
            return Ok(());
        }

        self.transition(SessionState::Active)?;
        if let (Some(capture), Some(blocks)) = (self.capture.as_mut(), block_tx.take()) {
            capture.start(blocks)?;
        }
        info!(session_id = %self.id(), "Live session active");
        Ok(())
    }

    /// Encode one captured block and queue it. Fire-and-forget: a failed send
    /// is dropped, never retried.
    fn send_block(&mut self, block: &[f32]) {
        if self.state != SessionState::Active {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };

        let chunk = MediaChunk {
            mime_type: pcm::mime_type(self.options.capture_sample_rate),
            data: pcm::encode_base64(block),
        };
        match transport.send_audio(chunk) {
            Ok(()) => metrics::record(&self.metrics, |m| m.frames_sent += 1),
            Err(e) => trace!("Dropped capture block: {}", e),
        }
    }

    /// Schedule every audio chunk of a frame, then honour its interruption flag.
    fn handle_frame(&mut self, frame: InboundFrame) {
        if self.state != SessionState::Active {
            trace!(
                session_id = %self.id(),
                state = %self.state,
                "Ignoring frame outside an active session"
            );
            return;
        }

        for data in &frame.audio {
            let samples = match pcm::decode_base64(data) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(session_id = %self.id(), "Skipping inbound audio chunk: {}", e);
                    metrics::record(&self.metrics, |m| m.decode_errors += 1);
                    continue;
                }
            };
            self.schedule_playback(samples);
        }

        if frame.interrupted {
            self.interrupt();
        }
        if frame.turn_complete {
            debug!(session_id = %self.id(), "Agent turn complete");
        }
    }

    fn schedule_playback(&mut self, samples: Vec<f32>) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let duration = pcm::duration_secs(samples.len(), self.options.playback_sample_rate);
        let buffer = self.scheduler.schedule(duration, sink.current_time());
        trace!(
            id = %buffer.id,
            start_at = buffer.start_at,
            duration = buffer.duration,
            cursor = self.scheduler.cursor(),
            outstanding = self.scheduler.outstanding(),
            "Scheduled playback buffer"
        );

        if let Err(e) = sink.play(buffer.id, samples, buffer.start_at) {
            warn!("Playback sink rejected {}: {}", buffer.id, e);
            self.scheduler.complete(buffer.id);
            return;
        }

        metrics::record(&self.metrics, |m| m.frames_received += 1);
        self.refresh_speaking();
    }

    /// Barge-in: silence everything queued and restart the timeline.
    fn interrupt(&mut self) {
        let flushed = self.scheduler.interrupt();
        if let Some(sink) = self.sink.as_mut() {
            for buffer in &flushed {
                // Buffers that already finished cannot be stopped.
                if let Err(e) = sink.stop_buffer(buffer.id) {
                    trace!("Ignoring stop of {}: {}", buffer.id, e);
                }
            }
        }

        info!(
            session_id = %self.id(),
            flushed = flushed.len(),
            "Agent interrupted, playback flushed"
        );
        metrics::record(&self.metrics, |m| m.interruptions += 1);
        self.refresh_speaking();
    }

    fn handle_completion(&mut self, id: BufferId) {
        if self.scheduler.complete(id) {
            trace!(%id, "Playback buffer finished");
            self.refresh_speaking();
        }
    }

    fn refresh_speaking(&self) {
        let speaking = !self.scheduler.is_idle();
        self.publisher.update(|status| {
            if status.speaking == speaking {
                return false;
            }
            status.set_speaking(speaking);
            true
        });
    }

    fn fail(&mut self, err: LiveError) {
        error!(session_id = %self.id(), code = err.code(), "Live session failed: {}", err);
        metrics::record(&self.metrics, |m| m.sessions_failed += 1);
        self.teardown(Some(err.to_string()));
    }

    /// Release everything and move to `Closed`. Later calls do nothing.
    fn teardown(&mut self, error: Option<String>) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.close();
        }
        self.scheduler.interrupt();
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }

        info!(session_id = %self.id(), from = %self.state, "Live session closed");
        self.state = SessionState::Closed;
        self.publisher.update(|status| {
            status.set_state(SessionState::Closed);
            status.error = error;
            true
        });
    }
}
