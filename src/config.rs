//! # Configuration Management
//!
//! Loads the application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables (with the `APP__` prefix and `__` as the separator)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT`, `GEMINI_API_KEY` / `API_KEY`
//! 2. Environment variables (`APP__SERVER__PORT`, `APP__LIVE__VOICE_NAME`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Sections:
//! - **server**: where the control surface listens
//! - **live**: the remote agent (endpoint, model, voice, coach prompt, API key)
//! - **audio**: capture/playback rates and the capture block size
//! - **host**: files used by the WAV device backend
//!
//! The API key is never serialized, so it does not leak through
//! `GET /api/v1/config`.

use crate::live::pcm;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Persona prompt for the recovery coach.
pub const COACH_SYSTEM_INSTRUCTION: &str = "You are Lumina, a compassionate, non-judgmental, and trauma-informed behavioral recovery coach. \
Your goal is to help users break free from compulsive behaviors (like gambling, over-shopping, or excessive social media). \
Use Motivational Interviewing techniques: \
1. Express empathy. \
2. Develop discrepancy (help user see difference between current behavior and values). \
3. Roll with resistance. \
4. Support self-efficacy. \
Keep responses concise, warm, and focused on small, achievable steps. Always maintain safety boundaries.";

/// Appended to the coach prompt for spoken sessions.
pub const LIVE_SESSION_SUFFIX: &str =
    " You are currently in a Live Voice session. Keep your spoken responses warm, relatively short, and conversational.";

pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Ten minutes of 24kHz playback, about 58 MB of timeline.
pub const DEFAULT_MAX_RECORDING_SECS: u64 = 600;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub host: HostConfig,
}

/// Where the HTTP/WebSocket control surface binds.
///
/// - `host = "127.0.0.1"`: only local UIs can connect (default)
/// - `host = "0.0.0.0"`: accept connections from anywhere
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote conversational agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// WebSocket endpoint of the bidirectional API (the key is appended as `?key=`)
    pub endpoint: String,
    pub model: String,
    /// Prebuilt voice used for synthesized speech
    pub voice_name: String,
    pub system_instruction: String,
    /// Secret; only ever read from the environment or config.toml
    #[serde(default, skip_serializing)]
    pub api_key: String,
}

/// Audio framing on both directions of the session.
///
/// ## Rates:
/// Capture and playback run at independent rates fixed by the remote agent:
/// 16kHz input and 24kHz output. `validate()` rejects anything else, since
/// inbound buffer durations are derived from the playback rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    /// Samples per captured block (one outbound frame per block)
    pub capture_block_size: usize,
}

/// WAV device backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// 16kHz mono WAV file played into the session as microphone input
    pub capture_file: String,
    /// Directory that receives one `<session id>.wav` recording per session
    pub recording_dir: String,
    /// Longest stretch of playback kept in a recording; later audio is
    /// still played and reported but not written
    pub max_recording_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveConfig {
                endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
                model: DEFAULT_LIVE_MODEL.to_string(),
                voice_name: "Kore".to_string(),
                system_instruction: format!("{}{}", COACH_SYSTEM_INSTRUCTION, LIVE_SESSION_SUFFIX),
                api_key: String::new(),
            },
            audio: AudioConfig {
                capture_sample_rate: pcm::CAPTURE_SAMPLE_RATE,
                playback_sample_rate: pcm::PLAYBACK_SAMPLE_RATE,
                capture_block_size: pcm::DEFAULT_BLOCK_SIZE,
            },
            host: HostConfig {
                capture_file: "audio/input.wav".to_string(),
                recording_dir: "recordings".to_string(),
                max_recording_secs: DEFAULT_MAX_RECORDING_SECS,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`: override the server port
    /// - `APP__LIVE__VOICE_NAME=Puck`: pick another prebuilt voice
    /// - `APP__HOST__CAPTURE_FILE=/tmp/mic.wav`: change the capture input
    /// - `GEMINI_API_KEY=...` or `API_KEY=...`: credentials for the live agent
    /// - `HOST` / `PORT`: deployment platform conventions
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Some(key) = api_key_from_env() {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the configuration values make sense.
    ///
    /// A missing API key is not an error here: the server can run without one
    /// and reports it when a session is started.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !self.live.endpoint.starts_with("ws://") && !self.live.endpoint.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "Live endpoint must be a ws:// or wss:// URL, got '{}'",
                self.live.endpoint
            ));
        }

        if self.live.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Live model cannot be empty"));
        }

        if self.live.voice_name.trim().is_empty() {
            return Err(anyhow::anyhow!("Voice name cannot be empty"));
        }

        if self.audio.capture_sample_rate != pcm::CAPTURE_SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Capture sample rate must be {} Hz, got {}",
                pcm::CAPTURE_SAMPLE_RATE,
                self.audio.capture_sample_rate
            ));
        }

        if self.audio.playback_sample_rate != pcm::PLAYBACK_SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Playback sample rate must be {} Hz, got {}",
                pcm::PLAYBACK_SAMPLE_RATE,
                self.audio.playback_sample_rate
            ));
        }

        if self.audio.capture_block_size == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.host.max_recording_secs == 0 {
            return Err(anyhow::anyhow!("Maximum recording length must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the fields present are changed, e.g. `{"live": {"voice_name": "Puck"}}`.
    /// The result is validated before returning.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            if let Some(endpoint) = live.get("endpoint").and_then(|v| v.as_str()) {
                self.live.endpoint = endpoint.to_string();
            }
            if let Some(model) = live.get("model").and_then(|v| v.as_str()) {
                self.live.model = model.to_string();
            }
            if let Some(voice) = live.get("voice_name").and_then(|v| v.as_str()) {
                self.live.voice_name = voice.to_string();
            }
            if let Some(instruction) = live.get("system_instruction").and_then(|v| v.as_str()) {
                self.live.system_instruction = instruction.to_string();
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(block) = audio.get("capture_block_size").and_then(|v| v.as_u64()) {
                self.audio.capture_block_size = block as usize;
            }
        }

        if let Some(host) = partial_config.get("host") {
            if let Some(file) = host.get("capture_file").and_then(|v| v.as_str()) {
                self.host.capture_file = file.to_string();
            }
            if let Some(dir) = host.get("recording_dir").and_then(|v| v.as_str()) {
                self.host.recording_dir = dir.to_string();
            }
            if let Some(secs) = host.get("max_recording_secs").and_then(|v| v.as_u64()) {
                self.host.max_recording_secs = secs;
            }
        }

        self.validate()?;
        Ok(())
    }
}

/// `GEMINI_API_KEY` wins over the generic `API_KEY`.
fn api_key_from_env() -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.live.voice_name, "Kore");
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.audio.playback_sample_rate, 24_000);
        assert_eq!(config.audio.capture_block_size, 4096);
        assert!(config.live.system_instruction.starts_with("You are Lumina"));
        assert!(config.live.system_instruction.ends_with("conversational."));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.live.endpoint = "https://example.test".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.capture_block_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.host.max_recording_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_rates_must_match_agent_audio() {
        let mut config = AppConfig::default();
        config.audio.playback_sample_rate = 48_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Playback sample rate must be 24000"));

        let mut config = AppConfig::default();
        config.audio.capture_sample_rate = 44_100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.playback_sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "live": {"voice_name": "Puck"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.live.voice_name, "Puck");
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json(r#"{"audio": {"capture_block_size": 0}}"#).is_err());
        assert!(config.update_from_json("not json").is_err());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = AppConfig::default();
        config.live.api_key = "secret".to_string();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("api_key"));
    }
}
