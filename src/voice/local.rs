//! Local speech output through a system synthesizer
//!
//! Used when no streaming TTS provider is configured. The whole reply is
//! spoken in one call; there is nothing to prefetch.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{Error, Result};

/// Words per minute at rate 1.0
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// Voice parameters for local speech
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// BCP 47 locale, e.g. `vi-VN`
    pub locale: String,
    /// System voice name; the locale picks one when unset
    pub voice: Option<String>,
    /// Speed multiplier (0.5 to 2.0)
    pub rate: f32,
    /// Pitch multiplier (0.5 to 2.0)
    pub pitch: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            locale: "vi-VN".to_string(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Speaks text on the local machine
#[async_trait]
pub trait LocalSpeech: Send + Sync {
    /// Speak `text`, resolving when speech ends
    ///
    /// Dropping the returned future stops speaking.
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer fails
    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<()>;
}

/// Local speech via `say` (macOS) or `espeak-ng`
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    program: String,
}

impl Default for CommandSpeech {
    fn default() -> Self {
        let program = if cfg!(target_os = "macos") {
            "say"
        } else {
            "espeak-ng"
        };
        Self::new(program)
    }
}

impl CommandSpeech {
    /// Use `program` as the synthesizer
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn is_say(&self) -> bool {
        std::path::Path::new(&self.program)
            .file_name()
            .is_some_and(|name| name == "say")
    }

    /// Command-line arguments for speaking `text`
    #[must_use]
    pub fn args(&self, text: &str, params: &VoiceParams) -> Vec<String> {
        let rate = params.rate.clamp(0.5, 2.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let wpm = (BASE_WORDS_PER_MINUTE * rate).round() as u32;

        let mut args = Vec::new();
        if self.is_say() {
            args.extend(["-r".to_string(), wpm.to_string()]);
            if let Some(voice) = &params.voice {
                args.extend(["-v".to_string(), voice.clone()]);
            }
        } else {
            // espeak-ng pitch is 0-99 with 50 as neutral
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let pitch = (50.0 * params.pitch.clamp(0.5, 2.0)).round().min(99.0) as u32;
            let voice = params.voice.clone().unwrap_or_else(|| {
                params
                    .locale
                    .split(['-', '_'])
                    .next()
                    .unwrap_or("en")
                    .to_lowercase()
            });
            args.extend([
                "-v".to_string(),
                voice,
                "-s".to_string(),
                wpm.to_string(),
                "-p".to_string(),
                pitch.to_string(),
            ]);
        }
        args.extend(["--".to_string(), text.to_string()]);
        args
    }
}

#[async_trait]
impl LocalSpeech for CommandSpeech {
    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let status = Command::new(&self.program)
            .args(self.args(text, params))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Tts(format!("failed to run {}: {e}", self.program)))?;

        if !status.success() {
            return Err(Error::Tts(format!("{} exited with {status}", self.program)));
        }

        Ok(())
    }
}
