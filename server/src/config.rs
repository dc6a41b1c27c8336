// Configuration constants for the server

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE: &str = "Kore";

#[derive(Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub port: u16,
    pub audio_dir: PathBuf,
    pub vapi_secret: Option<String>,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl ServerConfig {
    /// Read configuration from the environment. Every setting has a fallback
    /// default except the API credential: without `GEMINI_API_KEY` this
    /// returns an error and the process never binds a listener.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY must be set in the environment")?;

        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8085);

        let audio_dir = std::env::var("AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("audio"));

        let vapi_secret = std::env::var("VAPI_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let rate_limit_per_minute = std::env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let request_timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| origins.split(',').map(|s| s.trim().to_string()).collect());

        Ok(Self {
            api_key,
            model,
            voice,
            port,
            audio_dir,
            vapi_secret,
            rate_limit_per_minute,
            request_timeout_secs,
            cors_allowed_origins,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
