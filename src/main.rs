//! # Lumina Voice Backend - Main Application Entry Point
//!
//! Runs the live voice coaching session manager behind a small local control
//! surface. A UI starts and stops the session and watches its flags; audio
//! flows between the host devices and the remote agent.
//!
//! ## Application Architecture:
//! - **config**: configuration (defaults, config.toml, environment variables)
//! - **state**: shared application state (config and the live controller)
//! - **live**: the live audio session manager (framing, scheduling, transport, session)
//! - **host**: capture/playback device traits and the WAV file backend
//! - **health**: health endpoint
//! - **handlers**: HTTP handlers for config and session control
//! - **websocket**: status push and session control over `/ws/live`
//! - **error**: HTTP error types and JSON error responses

mod config;
mod error;
mod handlers;
mod health;
mod host;
mod live;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// How long a running session gets to release its devices on shutdown.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    // The live agent connection needs a process-wide TLS provider.
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A TLS crypto provider was already installed");
    }

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        model = %config.live.model,
        voice = %config.live.voice_name,
        capture_file = %config.host.capture_file,
        "Live agent configured"
    );
    if config.live.api_key.trim().is_empty() {
        warn!(
            "No GEMINI_API_KEY or API_KEY set; live sessions will be rejected until one is configured"
        );
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/live/start", web::post().to(handlers::start_live_session))
                    .route("/live/stop", web::post().to(handlers::stop_live_session))
                    .route("/live/status", web::get().to(handlers::live_status)),
            )
            .route("/ws/live", web::get().to(websocket::live_websocket))
            .route("/health", web::get().to(health::health_check))
            .default_service(web::route().to(handlers::not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            app_state.live.shutdown(SESSION_SHUTDOWN_TIMEOUT).await;
            server_handle.stop(true).await;
        }
    }

    app_state.live.shutdown(SESSION_SHUTDOWN_TIMEOUT).await;

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lumina_voice_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        if let Err(e) = wait_for_signal().await {
            error!("Failed to install signal handlers: {}", e);
            return;
        }
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
