//! Observable session state
//!
//! Presentation layers (an avatar, a CLI log) subscribe here instead of
//! being wired into the loop itself.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::agent::ResponderCommand;

/// Channel capacity for session events
const CHANNEL_CAPACITY: usize = 64;

/// What the voice loop is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    /// Waiting for the responder
    Processing,
    Speaking,
}

/// Something observers may want to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// The conversation loop was switched on or off
    LoopToggled(bool),
    /// Interim transcription
    Transcript(String),
    /// Finalized user utterance
    UserUtterance(String),
    /// Text about to be spoken
    Reply(String),
    /// Command attached to a reply
    Command(ResponderCommand),
    /// Non-fatal error
    Error(String),
}

/// Fan-out of session state and events
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct SessionBus {
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBus {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (state, _) = watch::channel(SessionState::Idle);
        Self { events, state }
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch the current state
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Publish an event (ignored if nobody is listening)
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Move to `next`, announcing the change if it is one
    pub fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            tracing::debug!(state = ?next, "session state changed");
            self.publish(SessionEvent::StateChanged(next));
        }
    }
}
