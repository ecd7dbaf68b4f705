//! # Live Agent Transport
//!
//! Opens the duplex channel to the remote conversational agent and exposes it
//! to the session as two halves:
//! - a [`TransportHandle`] for fire-and-forget outbound media frames
//! - an event receiver carrying [`TransportEvent`]s in arrival order
//!
//! ## Tasks:
//! Each connection runs one reader task (socket → events) and one writer task
//! (outbound queue → socket). The single writer is what keeps transmitted
//! blocks in capture order without making capture wait on the network.

use crate::config::LiveConfig;
use crate::live::error::LiveError;
use crate::live::protocol::{
    ClientMessage, MediaChunk, RealtimeInput, ServerMessage, SetupMessage, TransportEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, trace, warn};

/// Receiver side of a transport connection.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Something that can open a live agent connection.
///
/// The session only depends on this trait, so tests drive it with an
/// in-memory implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel and send `setup`. Readiness is reported later through
    /// [`TransportEvent::Opened`].
    async fn connect(
        &self,
        setup: &SetupMessage,
    ) -> Result<(TransportHandle, TransportEvents), LiveError>;
}

/// Commands consumed by the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Sending half of an open connection.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl TransportHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>, reader: Option<JoinHandle<()>>) -> Self {
        Self {
            outbound,
            reader,
            closed: false,
        }
    }

    /// Queue one media frame for transmission.
    ///
    /// Never waits for the network. Once the connection is gone the frame is
    /// dropped and an error is returned; callers are expected to ignore it.
    pub fn send_audio(&self, chunk: MediaChunk) -> Result<(), LiveError> {
        if self.is_closed() {
            return Err(LiveError::Transport("connection closed".to_string()));
        }

        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk],
        });
        let text = serde_json::to_string(&message)?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| LiveError::Transport("writer task has exited".to_string()))
    }

    /// Close the connection. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // The writer flushes the close frame and exits on its own.
        let _ = self.outbound.send(Outbound::Close);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// WebSocket transport for the Gemini Live bidirectional API.
#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    endpoint: String,
    api_key: String,
}

impl GeminiLiveTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &LiveConfig) -> Result<Self, LiveError> {
        if config.api_key.trim().is_empty() {
            return Err(LiveError::MissingApiKey);
        }
        Ok(Self::new(config.endpoint.clone(), config.api_key.clone()))
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

#[async_trait]
impl Transport for GeminiLiveTransport {
    async fn connect(
        &self,
        setup: &SetupMessage,
    ) -> Result<(TransportHandle, TransportEvents), LiveError> {
        info!(endpoint = %self.endpoint, model = %setup.model, "Connecting to live agent");

        let (ws_stream, _response) = connect_async(self.url())
            .await
            .map_err(|e| LiveError::Transport(format!("failed to open channel: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        let setup_json = serde_json::to_string(&ClientMessage::Setup(setup.clone()))?;
        write
            .send(WsMessage::Text(setup_json))
            .await
            .map_err(|e| LiveError::Transport(format!("failed to send setup: {}", e)))?;
        debug!("Setup message sent, waiting for setupComplete");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer task: drains the outbound queue in order.
        tokio::spawn(async move {
            while let Some(command) = out_rx.recv().await {
                match command {
                    Outbound::Text(text) => {
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            debug!("Dropping outbound frame, socket write failed: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            trace!("Live transport writer finished");
        });

        // Reader task: turns socket messages into transport events.
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Dropping non-UTF-8 binary frame from live agent: {}", e);
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        info!("Live agent closed the connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => {
                        if message.go_away.is_some() {
                            warn!("Live agent announced it will disconnect soon");
                        }
                        for event in message.into_events() {
                            if event_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Dropping malformed message from live agent: {} ({})",
                            e,
                            text.chars().take(100).collect::<String>()
                        );
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed);
        });

        Ok((TransportHandle::new(out_tx, Some(reader)), event_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::protocol::InboundFrame;

    fn chunk(data: &str) -> MediaChunk {
        MediaChunk {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_send_audio_queues_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TransportHandle::new(tx, None);

        handle.send_audio(chunk("AAAA")).unwrap();
        handle.send_audio(chunk("BBBB")).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        match (first, second) {
            (Outbound::Text(a), Outbound::Text(b)) => {
                assert!(a.contains("AAAA"));
                assert!(b.contains("BBBB"));
                assert!(a.contains("realtimeInput"));
            }
            other => panic!("unexpected commands: {:?}", other),
        }
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_sends() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = TransportHandle::new(tx, None);

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            handle.send_audio(chunk("AAAA")),
            Err(LiveError::Transport(_))
        ));
    }

    #[test]
    fn test_send_after_writer_exit_is_an_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = TransportHandle::new(tx, None);
        assert!(handle.send_audio(chunk("AAAA")).is_err());
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let mut config = crate::config::AppConfig::default().live;
        config.api_key = String::new();
        assert!(matches!(
            GeminiLiveTransport::from_config(&config),
            Err(LiveError::MissingApiKey)
        ));
    }

    async fn next_event(events: &mut TransportEvents) -> TransportEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_gemini_transport_against_local_agent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Stand-in agent: reads setup, acknowledges over a binary frame, reads
        // one audio frame, then sends junk, a barge-in and a close.
        let agent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let setup = match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => text,
                other => panic!("expected setup text, got {:?}", other),
            };
            ws.send(WsMessage::Binary(br#"{"setupComplete":{}}"#.to_vec()))
                .await
                .unwrap();

            let audio = match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => text,
                other => panic!("expected audio text, got {:?}", other),
            };

            ws.send(WsMessage::Text("garbage".to_string())).await.unwrap();
            ws.send(WsMessage::Text(r#"{"serverContent":{"interrupted":true}}"#.to_string()))
                .await
                .unwrap();
            ws.send(WsMessage::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}

            (setup, audio)
        });

        let transport = GeminiLiveTransport::new(format!("ws://{}/live", addr), "test-key");
        let setup = SetupMessage::audio("m", "Kore", "Be brief.");
        let (handle, mut events) = transport.connect(&setup).await.unwrap();

        assert_eq!(next_event(&mut events).await, TransportEvent::Opened);
        handle.send_audio(chunk("AAAA")).unwrap();

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Frame(InboundFrame {
                audio: Vec::new(),
                interrupted: true,
                turn_complete: false,
            })
        );
        assert_eq!(next_event(&mut events).await, TransportEvent::Closed);

        drop(handle);
        let (setup_text, audio_text) =
            tokio::time::timeout(std::time::Duration::from_secs(5), agent)
                .await
                .expect("agent did not finish")
                .unwrap();

        assert!(setup_text.starts_with(r#"{"setup":{"model":"models/m""#));
        assert_eq!(
            audio_text,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"AAAA"}]}}"#
        );
    }

    #[tokio::test]
    async fn test_gemini_transport_reports_unreachable_agent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = GeminiLiveTransport::new(format!("ws://{}/live", addr), "test-key");
        let setup = SetupMessage::audio("m", "Kore", "");
        assert!(matches!(
            transport.connect(&setup).await,
            Err(LiveError::Transport(_))
        ));
    }

    #[test]
    fn test_url_carries_key() {
        let transport = GeminiLiveTransport::new("wss://example.test/ws", "secret");
        assert_eq!(transport.url(), "wss://example.test/ws?key=secret");

        let transport = GeminiLiveTransport::new("wss://example.test/ws?alt=json", "secret");
        assert_eq!(transport.url(), "wss://example.test/ws?alt=json&key=secret");
    }
}
