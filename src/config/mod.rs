//! Configuration management for Parley
//!
//! Values are resolved with precedence env > TOML file > defaults.

pub mod file;

use std::path::Path;
use std::time::Duration;

use regex::Regex;

use crate::agent::{Gender, UserProfile};
use crate::history::DEFAULT_HISTORY_BUDGET;
use crate::voice::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_LOOKAHEAD, DEFAULT_SILENCE_TIMEOUT, EndpointConfig, VoiceParams,
};
use crate::{Error, Result};

use self::file::ParleyConfigFile;

/// Default exit-intent phrases
pub const DEFAULT_EXIT_PHRASES: &[&str] = &[
    "tạm biệt",
    "goodbye",
    "kết thúc",
    "dừng lại",
    "thôi đi",
];

/// Spoken when an exit phrase ends the conversation
pub const DEFAULT_FAREWELL: &str = "Tạm biệt bạn! Hẹn gặp lại.";

/// Spoken when the responder fails
pub const DEFAULT_FALLBACK_REPLY: &str =
    "Xin lỗi, hiện tại ViVi đang gặp chút khó khăn khi kết nối. Bạn thử lại sau nhé!";

/// Pause between the end of a reply and listening again
pub const DEFAULT_RELISTEN_DELAY: Duration = Duration::from_millis(200);

/// Pause before listening again after a capture error
pub const DEFAULT_ERROR_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Longest wait for a reply before the fallback is spoken
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Spoken when a timer set by voice runs out
pub const DEFAULT_TIMER_MESSAGE: &str = "Hết giờ hẹn!";

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub speech: SpeechConfig,
    pub session: SessionConfig,
    pub responder: ResponderConfig,
    pub profile: UserProfile,
    pub api_keys: ApiKeys,
}

/// Where replies are voiced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechProvider {
    /// Local system synthesizer
    Native,
    OpenAI,
    ElevenLabs,
    Gemini,
}

impl SpeechProvider {
    /// Parse a provider name
    ///
    /// # Errors
    ///
    /// Returns error for unknown providers
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "native" | "local" => Ok(Self::Native),
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            "gemini" => Ok(Self::Gemini),
            other => Err(Error::Config(format!("unknown speech provider: {other}"))),
        }
    }

    /// Whether replies go through the streaming synthesis pipeline
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        !matches!(self, Self::Native)
    }

    const fn default_voice(self) -> &'static str {
        match self {
            Self::Native => "",
            Self::OpenAI => "alloy",
            Self::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
            Self::Gemini => "Kore",
        }
    }

    const fn default_model(self) -> &'static str {
        match self {
            Self::Native => "",
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_multilingual_v2",
            Self::Gemini => "gemini-2.5-flash-preview-tts",
        }
    }
}

/// Speech output configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub provider: SpeechProvider,

    /// Provider voice name
    pub voice: String,

    /// Provider TTS model
    pub model: String,

    /// Segments fetched ahead of the one playing
    pub lookahead: usize,

    /// OpenAI speed multiplier (0.25 to 4.0)
    pub speed: f32,

    /// Longest wait for one segment's audio
    pub fetch_timeout: Duration,

    /// Parameters for the local synthesizer
    pub native: VoiceParams,

    /// Local synthesizer program override
    pub native_command: Option<String>,
}

/// Conversation loop configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Utterances matching any of these end the conversation
    pub exit_phrases: Vec<String>,
    pub farewell: String,
    pub fallback_reply: String,
    pub relisten_delay: Duration,
    pub error_retry_delay: Duration,
    pub reply_timeout: Duration,
    pub timer_message: String,

    /// Record completed turns and send them with each query
    pub history_enabled: bool,
    pub history_budget_chars: usize,

    /// Let the responder search the web
    pub search_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exit_phrases: DEFAULT_EXIT_PHRASES.iter().map(ToString::to_string).collect(),
            farewell: DEFAULT_FAREWELL.to_string(),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            relisten_delay: DEFAULT_RELISTEN_DELAY,
            error_retry_delay: DEFAULT_ERROR_RETRY_DELAY,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            timer_message: DEFAULT_TIMER_MESSAGE.to_string(),
            history_enabled: false,
            history_budget_chars: DEFAULT_HISTORY_BUDGET,
            search_enabled: false,
        }
    }
}

impl SessionConfig {
    /// Case-insensitive pattern matching any exit phrase
    ///
    /// # Errors
    ///
    /// Returns error if no phrase is configured or the pattern fails to compile
    pub fn exit_pattern(&self) -> Result<Regex> {
        let phrases: Vec<String> = self
            .exit_phrases
            .iter()
            .map(String::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();
        if phrases.is_empty() {
            return Err(Error::Config("at least one exit phrase is required".into()));
        }

        Regex::new(&format!("(?i)({})", phrases.join("|")))
            .map_err(|e| Error::Config(format!("invalid exit phrases: {e}")))
    }
}

/// Which service generates replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderProvider {
    OpenAI,
    Gemini,
}

impl ResponderProvider {
    /// Parse a provider name
    ///
    /// # Errors
    ///
    /// Returns error for unknown providers
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(Error::Config(format!("unknown responder provider: {other}"))),
        }
    }

    const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.5-flash",
        }
    }
}

/// Reply generation configuration
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub provider: ResponderProvider,
    pub model: String,
    pub base_url: Option<String>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,

    /// Gemini API key (chat and TTS)
    pub gemini: Option<String>,
}

impl ApiKeys {
    /// Key for a streaming speech provider
    #[must_use]
    pub fn for_speech(&self, provider: SpeechProvider) -> Option<&str> {
        match provider {
            SpeechProvider::Native => None,
            SpeechProvider::OpenAI => self.openai.as_deref(),
            SpeechProvider::ElevenLabs => self.elevenlabs.as_deref(),
            SpeechProvider::Gemini => self.gemini.as_deref(),
        }
    }

    /// Key for a responder provider
    #[must_use]
    pub fn for_responder(&self, provider: ResponderProvider) -> Option<&str> {
        match provider {
            ResponderProvider::OpenAI => self.openai.as_deref(),
            ResponderProvider::Gemini => self.gemini.as_deref(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the default config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Load configuration from the environment and the config file at `path`
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::resolve(file::load_config_file_from(path), |key| {
            std::env::var(key).ok()
        })
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn resolve(fc: ParleyConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let env_flag = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let env_num = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            gemini: env("GEMINI_API_KEY").or(fc.api_keys.gemini),
        };

        // Listening (env > toml > default)
        let endpoint = EndpointConfig {
            silence_timeout: env_num("PARLEY_SILENCE_TIMEOUT_MS")
                .or(fc.endpoint.silence_timeout_ms)
                .map_or(DEFAULT_SILENCE_TIMEOUT, Duration::from_millis),
            locale: env("PARLEY_LOCALE")
                .or(fc.endpoint.locale)
                .unwrap_or_else(|| EndpointConfig::default().locale),
        };

        // Speech output (env > toml > default)
        let speech_provider = env("PARLEY_SPEECH_PROVIDER")
            .or(fc.speech.provider)
            .map_or(Ok(SpeechProvider::Native), |p| SpeechProvider::parse(&p))?;
        let native_defaults = VoiceParams::default();
        let speech = SpeechConfig {
            provider: speech_provider,
            voice: env("PARLEY_SPEECH_VOICE")
                .or(fc.speech.voice)
                .unwrap_or_else(|| speech_provider.default_voice().to_string()),
            model: env("PARLEY_SPEECH_MODEL")
                .or(fc.speech.model)
                .unwrap_or_else(|| speech_provider.default_model().to_string()),
            lookahead: fc.speech.lookahead.unwrap_or(DEFAULT_LOOKAHEAD),
            speed: fc.speech.speed.unwrap_or(1.0),
            fetch_timeout: fc
                .speech
                .fetch_timeout_ms
                .map_or(DEFAULT_FETCH_TIMEOUT, Duration::from_millis),
            native: VoiceParams {
                locale: endpoint.locale.clone(),
                voice: fc.speech.native_voice,
                rate: fc.speech.native_rate.unwrap_or(native_defaults.rate),
                pitch: fc.speech.native_pitch.unwrap_or(native_defaults.pitch),
            },
            native_command: fc.speech.native_command,
        };

        // Conversation loop (env > toml > default)
        let defaults = SessionConfig::default();
        let search_enabled = env_flag("PARLEY_SEARCH")
            .or(fc.session.search_enabled)
            .unwrap_or(defaults.search_enabled);
        let session = SessionConfig {
            exit_phrases: fc.session.exit_phrases.unwrap_or(defaults.exit_phrases),
            farewell: fc.session.farewell.unwrap_or(defaults.farewell),
            fallback_reply: fc.session.fallback_reply.unwrap_or(defaults.fallback_reply),
            relisten_delay: fc
                .session
                .relisten_delay_ms
                .map_or(defaults.relisten_delay, Duration::from_millis),
            error_retry_delay: fc
                .session
                .error_retry_delay_ms
                .map_or(defaults.error_retry_delay, Duration::from_millis),
            reply_timeout: fc
                .session
                .reply_timeout_ms
                .map_or(defaults.reply_timeout, Duration::from_millis),
            timer_message: fc.session.timer_message.unwrap_or(defaults.timer_message),
            // History follows search mode unless set explicitly
            history_enabled: env_flag("PARLEY_HISTORY")
                .or(fc.session.history_enabled)
                .unwrap_or(search_enabled),
            history_budget_chars: fc
                .session
                .history_budget_chars
                .unwrap_or(defaults.history_budget_chars),
            search_enabled,
        };

        // Reply generation: Gemini when its key is present, else OpenAI
        let responder_provider = match env("PARLEY_RESPONDER_PROVIDER").or(fc.responder.provider) {
            Some(p) => ResponderProvider::parse(&p)?,
            None if api_keys.gemini.is_some() => ResponderProvider::Gemini,
            None => ResponderProvider::OpenAI,
        };
        let responder = ResponderConfig {
            provider: responder_provider,
            model: env("PARLEY_RESPONDER_MODEL")
                .or(fc.responder.model)
                .unwrap_or_else(|| responder_provider.default_model().to_string()),
            base_url: env("PARLEY_RESPONDER_BASE_URL").or(fc.responder.base_url),
        };

        let profile = UserProfile {
            name: fc.profile.name,
            gender: fc.profile.gender.as_deref().and_then(|g| {
                let parsed = Gender::parse(g);
                if parsed.is_none() {
                    tracing::warn!(gender = g, "unknown gender in profile, ignoring");
                }
                parsed
            }),
            personality: fc.profile.personality,
        };

        let config = Self {
            endpoint,
            speech,
            session,
            responder,
            profile,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the voice loop cannot run with
    ///
    /// # Errors
    ///
    /// Returns error on a zero silence or request timeout, unusable exit
    /// phrases, or a streaming speech provider without an API key
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.silence_timeout.is_zero() {
            return Err(Error::Config("silence timeout must be positive".into()));
        }
        if self.speech.fetch_timeout.is_zero() || self.session.reply_timeout.is_zero() {
            return Err(Error::Config("request timeouts must be positive".into()));
        }

        self.session.exit_pattern()?;

        let provider = self.speech.provider;
        if provider.is_streaming() && self.api_keys.for_speech(provider).is_none() {
            return Err(Error::Config(format!(
                "{provider:?} speech requires an API key"
            )));
        }

        Ok(())
    }
}
