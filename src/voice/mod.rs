//! Voice processing module
//!
//! Capture events flow through the [`Endpointer`] into utterances; replies
//! are split by [`segment`] and spoken by the [`Speaker`], either through the
//! prefetching [`SpeechSynthesisPipeline`] or a local synthesizer.

mod capture;
mod cue;
mod endpoint;
mod local;
mod pipeline;
mod playback;
mod segment;
mod speaker;
mod synth;

pub use capture::{CaptureErrorKind, CaptureEvent, CaptureSource, ChannelCapture};
pub use cue::{AudioCuePlayer, Cue};
pub use endpoint::{
    DEFAULT_SILENCE_TIMEOUT, EndpointConfig, EndpointPhase, Endpointer, FinalizedBy,
    SessionOutcome, TranscriptHook, Utterance,
};
pub use local::{CommandSpeech, LocalSpeech, VoiceParams};
pub use pipeline::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_LOOKAHEAD, PipelineHandle, SpeechSynthesisPipeline,
};
pub use playback::{
    AudioClip, AudioFormat, AudioOutput, CpalOutput, EncodedAudio, PCM_SAMPLE_RATE, PlaybackEnd,
};
pub use segment::{Segment, segment};
pub use speaker::Speaker;
pub use synth::{SpeechSynthesizer, TextToSpeech};
