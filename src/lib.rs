//! Parley - hands-free conversational voice loop
//!
//! This library provides the pieces of a listen/respond/speak loop:
//! - Endpointing a live transcription stream into utterances
//! - Reply generation with structured commands
//! - Sentence segmentation and prefetching speech synthesis
//! - A session controller that keeps listening and speaking mutually exclusive
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Host (CLI, UI, avatar)                  │
//! │   toggle  │  capture events  │  session events      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              VoiceSessionController                  │
//! │   Endpointer  │  Responder  │  History  │  Speaker  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Speech output                       │
//! │   Segmenter  │  Synthesis pipeline  │  Local TTS    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod history;
pub mod session;
pub mod voice;

pub use agent::{
    ChatResponder, GeminiResponder, Reply, Responder, ResponderCommand, ResponderRequest,
    UserProfile,
};
pub use config::Config;
pub use error::{Error, Result};
pub use history::{HistoryStore, Role, Turn};
pub use session::{SessionBus, SessionEvent, SessionHandle, SessionState, VoiceSessionController};
pub use voice::{
    AudioCuePlayer, CaptureEvent, CaptureSource, ChannelCapture, Endpointer, Segment, Speaker,
    SpeechSynthesisPipeline, segment,
};
