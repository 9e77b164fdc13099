//! Generation backend configuration.
//!
//! The queue treats generation engines as opaque HTTP services, one
//! endpoint per stage. Endpoints are keyed by the stage's lowercase name so
//! this crate stays independent of the queue's types.

use crate::{get_env_or_default, parse_env, ConfigResult};

/// Endpoints and client settings for the generation services.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Chapter text generation endpoint.
    pub text_url: String,

    /// Document rendering endpoint.
    pub render_url: String,

    /// Audio narration endpoint.
    pub audio_url: String,

    /// Song generation endpoint.
    pub song_url: String,

    /// Bearer token sent to the generation services, when required.
    pub api_key: Option<String>,

    /// HTTP client timeout in seconds. Generous: single calls may run for
    /// many minutes, and the stall watchdog is the real safety net.
    pub request_timeout_secs: u64,
}

impl GenerationConfig {
    /// Load generation configuration from environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            text_url: get_env_or_default("GENERATION_TEXT_URL", "http://localhost:7810/generate"),
            render_url: get_env_or_default(
                "GENERATION_RENDER_URL",
                "http://localhost:7811/render",
            ),
            audio_url: get_env_or_default(
                "GENERATION_AUDIO_URL",
                "http://localhost:7812/narrate",
            ),
            song_url: get_env_or_default("GENERATION_SONG_URL", "http://localhost:7813/compose"),
            api_key: std::env::var("GENERATION_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            request_timeout_secs: parse_env("GENERATION_REQUEST_TIMEOUT", 1800)?,
        })
    }

    /// Endpoint for a stage, by its lowercase name.
    pub fn endpoint(&self, stage: &str) -> Option<&str> {
        match stage {
            "text" => Some(&self.text_url),
            "render" => Some(&self.render_url),
            "audio" => Some(&self.audio_url),
            "song" => Some(&self.song_url),
            _ => None,
        }
    }
}
