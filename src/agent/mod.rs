//! Reply generation: prompts, responders and structured commands

mod command;
mod prompt;
mod responder;

pub use command::{Reply, ResponderCommand, parse_reply};
pub use prompt::{Gender, UserProfile, build_instruction, system_instruction};
pub use responder::{
    ChatResponder, DEFAULT_CHAT_BASE_URL, DEFAULT_GEMINI_BASE_URL, GeminiResponder, Responder,
    ResponderRequest,
};
