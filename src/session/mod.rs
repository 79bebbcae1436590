//! Voice session: the conversation loop and its observable state

mod controller;
mod state;

pub use controller::{SessionHandle, VoiceSessionController};
pub use state::{SessionBus, SessionEvent, SessionState};
