//! # Application State Management
//!
//! State shared by every HTTP handler and WebSocket actor.
//!
//! ## Arc<RwLock<T>> Pattern:
//! - **Arc**: every worker thread of the server holds a reference
//! - **RwLock**: many concurrent readers of the configuration, one writer
//!
//! The live controller synchronizes itself internally, so it is shared through
//! a plain `Arc`.

use crate::config::AppConfig;
use crate::live::{LiveController, LiveMetrics, SessionStatus};
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Owner of the live voice session
    pub live: Arc<LiveController>,

    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            live: Arc::new(LiveController::new()),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration. Cloning releases the lock right away.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Sessions already running keep the configuration they started with.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = new_config;
        Ok(())
    }

    pub fn live_status(&self) -> SessionStatus {
        self.live.status()
    }

    pub fn live_metrics(&self) -> LiveMetrics {
        self.live.metrics()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::SessionState;

    #[test]
    fn test_update_config_validates() {
        let state = AppState::new(AppConfig::default());

        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.get_config().server.port, 8080);

        let mut good = state.get_config();
        good.live.voice_name = "Puck".to_string();
        assert!(state.update_config(good).is_ok());
        assert_eq!(state.get_config().live.voice_name, "Puck");
    }

    #[test]
    fn test_new_state_is_idle() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(state.live_status().state, SessionState::Idle);
        assert_eq!(state.live_metrics(), LiveMetrics::default());
    }
}
