//! Streaming text-to-speech providers
//!
//! Each call synthesizes one reply segment. Calls for several segments run
//! concurrently while earlier segments play.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use super::playback::{AudioFormat, EncodedAudio, PCM_SAMPLE_RATE};
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_SPEECH_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Upper bound on a single provider request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces audio for a piece of text
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice`
    ///
    /// Returns `Ok(None)` when the provider produced no audio.
    ///
    /// # Errors
    ///
    /// Returns error if the provider request fails
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Option<EncodedAudio>>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TtsProvider {
    OpenAI,
    ElevenLabs,
    Gemini,
}

/// Synthesizes speech over HTTP
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    speed: f32,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// `OpenAI` speech endpoint (MP3 output)
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, model: String, speed: f32) -> Result<Self> {
        Self::build(api_key, model, speed, TtsProvider::OpenAI)
    }

    /// ElevenLabs speech endpoint (MP3 output); the voice is an ElevenLabs voice ID
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, model: String) -> Result<Self> {
        Self::build(api_key, model, 1.0, TtsProvider::ElevenLabs)
    }

    /// Gemini audio generation (raw 24 kHz PCM output)
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_gemini(api_key: String, model: String) -> Result<Self> {
        Self::build(api_key, model, 1.0, TtsProvider::Gemini)
    }

    fn build(api_key: String, model: String, speed: f32, provider: TtsProvider) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "{provider:?} API key required for TTS"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            speed,
            provider,
        })
    }

    async fn synthesize_openai(&self, text: &str, voice: &str) -> Result<Option<EncodedAudio>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&TtsRequest {
                model: &self.model,
                input: text,
                voice,
                speed: self.speed,
            })
            .send()
            .await?;

        let audio = checked_body(response, "OpenAI").await?;
        Ok(non_empty(audio, AudioFormat::Mp3))
    }

    async fn synthesize_elevenlabs(&self, text: &str, voice: &str) -> Result<Option<EncodedAudio>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let response = self
            .client
            .post(format!("{ELEVENLABS_SPEECH_URL}/{voice}"))
            .header("xi-api-key", &self.api_key)
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;

        let audio = checked_body(response, "ElevenLabs").await?;
        Ok(non_empty(audio, AudioFormat::Mp3))
    }

    async fn synthesize_gemini(&self, text: &str, voice: &str) -> Result<Option<EncodedAudio>> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        });

        let response = self
            .client
            .post(format!("{GEMINI_API_URL}/{}:generateContent", self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let payload: serde_json::Value =
            serde_json::from_slice(&checked_body(response, "Gemini").await?)?;
        let Some(data) = payload
            .pointer("/candidates/0/content/parts/0/inlineData/data")
            .and_then(serde_json::Value::as_str)
        else {
            return Ok(None);
        };

        let pcm = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Tts(format!("invalid audio payload: {e}")))?;
        Ok(non_empty(
            pcm,
            AudioFormat::Pcm16 {
                sample_rate: PCM_SAMPLE_RATE,
            },
        ))
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Option<EncodedAudio>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, voice).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await,
            TtsProvider::Gemini => self.synthesize_gemini(text, voice).await,
        }
    }
}

/// Read the body of a successful response, or turn the failure into a TTS error
async fn checked_body(response: reqwest::Response, provider: &str) -> Result<Vec<u8>> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Tts(format!("{provider} TTS error {status}: {body}")));
    }

    Ok(response.bytes().await?.to_vec())
}

fn non_empty(bytes: Vec<u8>, format: AudioFormat) -> Option<EncodedAudio> {
    (!bytes.is_empty()).then(|| EncodedAudio::new(bytes, format))
}
