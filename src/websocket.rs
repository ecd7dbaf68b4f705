//! # Live Status WebSocket
//!
//! `/ws/live` lets a UI drive the live session and watch its flags without
//! polling.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the server immediately pushes the current `status`
//! 2. **Updates**: every status change (connecting, active, speaking, closed)
//!    is pushed as another `status` message
//! 3. **Commands**: `{"type":"start"}`, `{"type":"stop"}` and
//!    `{"type":"ping","timestamp":…}` from the client
//! 4. **Heartbeat**: the server pings every 30 seconds and drops clients that
//!    stay silent for 60 seconds
//!
//! Audio never travels over this socket; it flows between the host devices and
//! the remote agent.

use crate::live::{LiveError, SessionStatus};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages accepted from the client.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Start,
    Stop,
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
}

/// Messages pushed to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Status { status: SessionStatus },
    Started { session_id: String },
    Error { code: String, message: String },
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub struct LiveStatusSocket {
    state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl LiveStatusSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize WebSocket event: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!("WebSocket error {}: {}", code, message);
        self.send(
            ctx,
            &ServerEvent::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_command(&mut self, command: ClientCommand, ctx: &mut ws::WebsocketContext<Self>) {
        match command {
            ClientCommand::Start => {
                let config = self.state.get_config();
                match self.state.live.start(&config) {
                    Ok(session_id) => self.send(ctx, &ServerEvent::Started { session_id }),
                    Err(e) => self.send_live_error(ctx, &e),
                }
            }
            ClientCommand::Stop => {
                // The status stream reports the resulting Closed state.
                self.state.live.stop();
            }
            ClientCommand::Ping { timestamp } => {
                self.last_heartbeat = Instant::now();
                self.send(ctx, &ServerEvent::Pong { timestamp });
            }
            ClientCommand::Pong { .. } => {
                self.last_heartbeat = Instant::now();
            }
        }
    }

    fn send_live_error(&self, ctx: &mut ws::WebsocketContext<Self>, err: &LiveError) {
        self.send_error(ctx, err.code(), &err.to_string());
    }
}

impl Actor for LiveStatusSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Live status WebSocket connected");

        ctx.add_stream(WatchStream::new(self.state.live.subscribe()));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            act.send(ctx, &ServerEvent::Ping { timestamp: now_millis() });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Live status WebSocket disconnected");
    }
}

/// Status updates from the live controller.
impl StreamHandler<SessionStatus> for LiveStatusSocket {
    fn handle(&mut self, status: SessionStatus, ctx: &mut Self::Context) {
        debug!(state = %status.state, speaking = status.speaking, "Pushing live status");
        self.send(ctx, &ServerEvent::Status { status });
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("Live status stream ended");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveStatusSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => self.handle_command(command, ctx),
                Err(err) => self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err)),
            },
            Ok(ws::Message::Binary(_)) => {
                self.send_error(
                    ctx,
                    "unsupported",
                    "Binary messages are not accepted on this socket",
                );
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/live`
pub async fn live_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    ws::start(LiveStatusSocket::new(state), &req, stream)
}
