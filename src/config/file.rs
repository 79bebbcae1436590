//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    #[serde(default)]
    pub endpoint: EndpointFileConfig,

    #[serde(default)]
    pub speech: SpeechFileConfig,

    #[serde(default)]
    pub session: SessionFileConfig,

    #[serde(default)]
    pub responder: ResponderFileConfig,

    #[serde(default)]
    pub profile: ProfileFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Listening configuration
#[derive(Debug, Default, Deserialize)]
pub struct EndpointFileConfig {
    /// Silence after the last partial result before finalizing
    pub silence_timeout_ms: Option<u64>,

    /// Recognition locale (e.g. "vi-VN")
    pub locale: Option<String>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// "native", "openai", "elevenlabs" or "gemini"
    pub provider: Option<String>,

    /// Provider voice (e.g. "alloy", "Kore")
    pub voice: Option<String>,

    /// Provider TTS model
    pub model: Option<String>,

    /// Segments fetched ahead of the one playing
    pub lookahead: Option<usize>,

    /// OpenAI speed multiplier
    pub speed: Option<f32>,

    /// Give up on a segment's synthesis after this long
    pub fetch_timeout_ms: Option<u64>,

    pub native_voice: Option<String>,
    pub native_rate: Option<f32>,
    pub native_pitch: Option<f32>,

    /// Local synthesizer program (defaults to `say` or `espeak-ng`)
    pub native_command: Option<String>,
}

/// Conversation loop configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub exit_phrases: Option<Vec<String>>,
    pub farewell: Option<String>,
    pub fallback_reply: Option<String>,
    pub relisten_delay_ms: Option<u64>,
    pub error_retry_delay_ms: Option<u64>,
    /// Speak the fallback reply if the responder takes longer than this
    pub reply_timeout_ms: Option<u64>,
    /// Spoken when a timer set by voice runs out
    pub timer_message: Option<String>,
    pub history_enabled: Option<bool>,
    pub history_budget_chars: Option<usize>,
    pub search_enabled: Option<bool>,
}

/// Reply generation configuration
#[derive(Debug, Default, Deserialize)]
pub struct ResponderFileConfig {
    /// "openai" or "gemini"
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Override for OpenAI-compatible or Gemini API base URL
    pub base_url: Option<String>,
}

/// User profile
#[derive(Debug, Default, Deserialize)]
pub struct ProfileFileConfig {
    pub name: Option<String>,
    /// "male", "female" or "other"
    pub gender: Option<String>,
    pub personality: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub gemini: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    config_file_path().map_or_else(ParleyConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> ParleyConfigFile {
    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is invalid
pub fn parse_config(content: &str) -> crate::Result<ParleyConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
