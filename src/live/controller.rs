//! # Live Controller
//!
//! The UI-facing owner of live sessions. At most one session runs at a time.
//!
//! ## Operations:
//! - **start**: build devices and transport from the configuration and spawn
//!   the session task; rejected with `AlreadyRunning` while one is live
//! - **stop**: signal the session and mark the status `Closed` right away,
//!   without waiting for in-flight work; repeated calls do nothing
//! - **status / subscribe**: the current [`SessionStatus`] and a watch
//!   receiver that sees every change

use crate::config::AppConfig;
use crate::host::{AudioHost, WavHost};
use crate::live::metrics::{self, LiveMetrics, SharedMetrics};
use crate::live::session::{LiveSession, SessionOptions, StatusPublisher};
use crate::live::{LiveError, SessionState, SessionStatus};
use crate::live::transport::{GeminiLiveTransport, Transport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug)]
struct RunningSession {
    id: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub struct LiveController {
    status: Arc<watch::Sender<SessionStatus>>,
    metrics: SharedMetrics,
    running: Mutex<Option<RunningSession>>,
}

impl LiveController {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SessionStatus::idle());
        Self {
            status: Arc::new(status),
            metrics: metrics::shared(),
            running: Mutex::new(None),
        }
    }

    /// Start a session against the configured agent, using the WAV devices.
    pub fn start(&self, config: &AppConfig) -> Result<String, LiveError> {
        if self.is_running() {
            return Err(LiveError::AlreadyRunning);
        }

        let transport = GeminiLiveTransport::from_config(&config.live)?;
        let host = WavHost::from_config(&config.host);
        self.start_with(Arc::new(host), Arc::new(transport), SessionOptions::from_config(config))
    }

    /// Start a session with explicit devices and transport. Returns the new
    /// session id; progress is reported through the status.
    pub fn start_with(
        &self,
        host: Arc<dyn AudioHost>,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Result<String, LiveError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = running.as_ref() {
            if self.owns_live_status(&current.id) {
                return Err(LiveError::AlreadyRunning);
            }
        }

        let session_id = options.session_id.clone();
        self.status.send_replace(SessionStatus::for_session(&session_id));
        metrics::record(&self.metrics, |m| m.sessions_started += 1);

        let publisher = StatusPublisher::new(session_id.clone(), self.status.clone());
        let session = LiveSession::new(options, publisher, self.metrics.clone());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(host, transport, stop_rx));

        info!(session_id = %session_id, "Live session started");
        *running = Some(RunningSession {
            id: session_id.clone(),
            stop: stop_tx,
            task,
        });
        Ok(session_id)
    }

    /// Stop the current session, if any, and return the resulting status.
    pub fn stop(&self) -> SessionStatus {
        let previous = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(session) = previous {
            // The task may already have finished on its own.
            let _ = session.stop.send(());
            info!(session_id = %session.id, "Live session stop requested");
        }

        self.status.send_if_modified(|status| {
            if status.state == SessionState::Closed {
                return false;
            }
            status.set_state(SessionState::Closed);
            true
        });
        self.status()
    }

    /// Stop and wait for the session task to release its devices.
    pub async fn shutdown(&self, timeout: Duration) {
        let previous = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.stop();

        if let Some(session) = previous {
            let _ = session.stop.send(());
            if tokio::time::timeout(timeout, session.task).await.is_err() {
                warn!(session_id = %session.id, "Live session did not stop in time");
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn metrics(&self) -> LiveMetrics {
        metrics::snapshot(&self.metrics)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|current| self.owns_live_status(&current.id))
    }

    /// The published status belongs to `session_id` and is not yet closed.
    fn owns_live_status(&self, session_id: &str) -> bool {
        let status = self.status.borrow();
        status.session_id.as_deref() == Some(session_id) && status.state != SessionState::Closed
    }
}

impl Default for LiveController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::FakeHost;
    use crate::live::pcm;
    use crate::live::protocol::{SetupMessage, TransportEvent};
    use crate::live::session::tests::FakeTransport;

    fn options(session_id: &str) -> SessionOptions {
        SessionOptions {
            session_id: session_id.to_string(),
            setup: SetupMessage::audio("test-model", "Kore", ""),
            capture_sample_rate: pcm::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: pcm::PLAYBACK_SAMPLE_RATE,
            block_size: 4,
        }
    }

    async fn wait_for_state(controller: &LiveController, state: SessionState) {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("status channel closed");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let controller = LiveController::new();
        let host = FakeHost::new();
        let (transport, link) = FakeTransport::new();

        let id = controller
            .start_with(Arc::new(host.clone()), Arc::new(transport), options("first"))
            .unwrap();
        assert_eq!(id, "first");
        link.events.send(TransportEvent::Opened).unwrap();
        wait_for_state(&controller, SessionState::Active).await;

        let (other, _other_link) = FakeTransport::new();
        assert!(matches!(
            controller.start_with(Arc::new(FakeHost::new()), Arc::new(other), options("second")),
            Err(LiveError::AlreadyRunning)
        ));
        assert_eq!(controller.status().session_id.as_deref(), Some("first"));

        controller.shutdown(Duration::from_secs(2)).await;
        assert_eq!(host.capture.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_stop_without_session() {
        let controller = LiveController::new();
        assert_eq!(controller.status().state, SessionState::Idle);

        let first = controller.stop();
        assert_eq!(first.state, SessionState::Closed);
        assert!(!first.active && !first.connecting && !first.speaking);

        let second = controller.stop();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_stop_closes_immediately_and_twice_is_noop() {
        let controller = LiveController::new();
        let host = FakeHost::new();
        let (transport, link) = FakeTransport::new();
        controller
            .start_with(Arc::new(host.clone()), Arc::new(transport), options("s1"))
            .unwrap();
        link.events.send(TransportEvent::Opened).unwrap();
        wait_for_state(&controller, SessionState::Active).await;

        let status = controller.stop();
        assert_eq!(status.state, SessionState::Closed);
        assert!(!status.active);
        assert!(!controller.is_running());

        let again = controller.stop();
        assert_eq!(again, status);

        for _ in 0..200 {
            if host.sink.lock().unwrap().closed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(host.sink.lock().unwrap().closed, 1);
        // The session's own Closed update arrives late and is ignored.
        assert_eq!(controller.status(), status);
    }

    #[tokio::test]
    async fn test_restart_after_failure() {
        let controller = LiveController::new();
        controller
            .start_with(
                Arc::new(FakeHost::new()),
                Arc::new(FakeTransport::refusing()),
                options("broken"),
            )
            .unwrap();
        wait_for_state(&controller, SessionState::Closed).await;
        assert!(controller.status().error.is_some());
        assert!(!controller.is_running());

        let (transport, _link) = FakeTransport::new();
        let id = controller
            .start_with(Arc::new(FakeHost::new()), Arc::new(transport), options("fresh"))
            .unwrap();
        assert_eq!(id, "fresh");
        let status = controller.status();
        assert_eq!(status.session_id.as_deref(), Some("fresh"));
        assert!(status.error.is_none());

        let metrics = controller.metrics();
        assert_eq!(metrics.sessions_started, 2);
        assert_eq!(metrics.sessions_failed, 1);

        controller.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_start_requires_api_key() {
        let controller = LiveController::new();
        let mut config = AppConfig::default();
        config.live.api_key = String::new();

        assert!(matches!(controller.start(&config), Err(LiveError::MissingApiKey)));
        assert_eq!(controller.status().state, SessionState::Idle);
    }
}
