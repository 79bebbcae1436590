//! The conversation loop
//!
//! The controller is an actor: it owns the endpointer, the history and the
//! turn bookkeeping, and everything that happens to it arrives as a message.
//! Responder calls and speech run as background tasks that report back with
//! the ID they were started under, so a result from a turn or speech run
//! that has since been abandoned is recognized and dropped.
//!
//! ```text
//!   toggle ──▶ Listening ──utterance──▶ Processing ──reply──▶ Speaking
//!                  ▲                                             │
//!                  └──────────────── relisten delay ◀────────────┘
//! ```
//!
//! A reply carrying a timer command arms a countdown. When it runs out the
//! timer message interrupts whatever the loop is doing and is spoken like
//! any other reply.

use std::sync::Arc;

use regex::Regex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};

use super::state::{SessionBus, SessionEvent, SessionState};
use crate::agent::{Reply, Responder, ResponderCommand, ResponderRequest, UserProfile};
use crate::config::SessionConfig;
use crate::history::HistoryStore;
use crate::voice::{CaptureErrorKind, Endpointer, SessionOutcome, Speaker};
use crate::{Error, Result};

/// Buffered control messages
const CONTROL_CHANNEL_CAPACITY: usize = 16;

enum Control {
    Toggle(oneshot::Sender<bool>),
    Interrupt,
    Shutdown,
}

enum Internal {
    ReplyReady {
        turn: u64,
        query: String,
        result: Result<Reply>,
    },
    SpeechDone {
        run: u64,
    },
}

/// Handle for driving a running [`VoiceSessionController`]
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    control: mpsc::Sender<Control>,
    bus: SessionBus,
}

impl SessionHandle {
    /// Switch the conversation loop on or off
    ///
    /// Returns whether the loop is now active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the controller has stopped
    pub async fn toggle(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Toggle(tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Cut off the current reply and listen again
    ///
    /// Does nothing while the loop is off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the controller has stopped
    pub async fn interrupt(&self) -> Result<()> {
        self.control
            .send(Control::Interrupt)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Stop the loop and the controller
    pub async fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown).await;
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Watch the session state
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.bus.watch_state()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.bus.state()
    }
}

/// Top-level voice loop: listen, respond, speak, listen again
pub struct VoiceSessionController {
    endpointer: Endpointer,
    speaker: Arc<Speaker>,
    responder: Arc<dyn Responder>,
    history: HistoryStore,
    profile: Option<UserProfile>,
    settings: SessionConfig,
    exit_pattern: Regex,
    bus: SessionBus,

    /// Conversation loop switched on
    active: bool,
    next_id: u64,
    /// Turn whose reply is awaited
    pending_turn: Option<u64>,
    /// Speech run whose completion is awaited
    speech_run: Option<u64>,
    relisten_at: Option<Instant>,
    /// Countdown set by a timer command; survives the loop being switched off
    timer_at: Option<Instant>,

    control: mpsc::Receiver<Control>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl VoiceSessionController {
    /// Create a controller and its handle
    ///
    /// The controller does nothing until [`run`](Self::run) is awaited.
    ///
    /// # Errors
    ///
    /// Returns error if the exit phrases do not form a valid pattern
    pub fn new(
        endpointer: Endpointer,
        speaker: Arc<Speaker>,
        responder: Arc<dyn Responder>,
        settings: SessionConfig,
        profile: Option<UserProfile>,
    ) -> Result<(Self, SessionHandle)> {
        Self::with_bus(
            endpointer,
            speaker,
            responder,
            settings,
            profile,
            SessionBus::new(),
        )
    }

    /// Create a controller publishing on an existing bus
    ///
    /// # Errors
    ///
    /// Returns error if the exit phrases do not form a valid pattern
    pub fn with_bus(
        endpointer: Endpointer,
        speaker: Arc<Speaker>,
        responder: Arc<dyn Responder>,
        settings: SessionConfig,
        profile: Option<UserProfile>,
        bus: SessionBus,
    ) -> Result<(Self, SessionHandle)> {
        let exit_pattern = settings.exit_pattern()?;
        let (control_tx, control) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let transcripts = bus.clone();
        let endpointer = endpointer.with_transcript_hook(move |text| {
            transcripts.publish(SessionEvent::Transcript(text.to_string()));
        });

        let controller = Self {
            endpointer,
            speaker,
            responder,
            history: HistoryStore::new(settings.history_budget_chars),
            profile,
            settings,
            exit_pattern,
            bus: bus.clone(),
            active: false,
            next_id: 0,
            pending_turn: None,
            speech_run: None,
            relisten_at: None,
            timer_at: None,
            control,
            internal_tx,
            internal_rx,
        };
        let handle = SessionHandle {
            control: control_tx,
            bus,
        };
        Ok((controller, handle))
    }

    /// Spawn the controller onto the current runtime
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("voice session controller started");

        loop {
            let listening = self.endpointer.is_listening();
            let relisten_at = self.relisten_at;
            let timer_at = self.timer_at;

            tokio::select! {
                biased;
                control = self.control.recv() => match control {
                    Some(Control::Toggle(reply)) => {
                        let active = self.toggle().await;
                        let _ = reply.send(active);
                    }
                    Some(Control::Interrupt) => self.interrupt().await,
                    Some(Control::Shutdown) | None => break,
                },
                Some(message) = self.internal_rx.recv() => self.on_internal(message),
                outcome = self.endpointer.next_outcome(), if listening => {
                    self.on_outcome(outcome);
                }
                () = sleep_until_some(timer_at), if timer_at.is_some() => {
                    self.timer_at = None;
                    self.on_timer_expired();
                }
                () = sleep_until_some(relisten_at), if relisten_at.is_some() => {
                    self.relisten_at = None;
                    self.listen().await;
                }
            }
        }

        self.deactivate();
        tracing::info!("voice session controller stopped");
    }

    async fn toggle(&mut self) -> bool {
        if self.active {
            tracing::info!("conversation loop off");
            self.deactivate();
        } else {
            tracing::info!("conversation loop on");
            self.active = true;
            self.bus.publish(SessionEvent::LoopToggled(true));
            self.listen().await;
        }
        self.active
    }

    async fn interrupt(&mut self) {
        if !self.active {
            return;
        }
        tracing::debug!("barge-in");
        self.pending_turn = None;
        self.listen().await;
    }

    /// Stop everything: capture, speech, timers, pending turn
    fn deactivate(&mut self) {
        let was_active = self.active;
        self.active = false;

        self.endpointer.stop();
        self.speaker.cancel();
        self.speech_run = None;
        self.relisten_at = None;
        self.pending_turn = None;

        if was_active {
            self.bus.publish(SessionEvent::LoopToggled(false));
        }
        self.bus.set_state(SessionState::Idle);
    }

    /// Open a new listening session
    async fn listen(&mut self) {
        if !self.active {
            return;
        }
        self.relisten_at = None;

        // Never listen while our own audio is playing
        self.speaker.cancel();
        self.speech_run = None;

        match self.endpointer.start().await {
            Ok(()) => self.bus.set_state(SessionState::Listening),
            Err(Error::CaptureUnavailable) => {
                tracing::warn!("no capture source, conversation loop off");
                self.bus
                    .publish(SessionEvent::Error(Error::CaptureUnavailable.to_string()));
                self.deactivate();
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start listening");
                self.bus.publish(SessionEvent::Error(e.to_string()));
                self.bus.set_state(SessionState::Idle);
                self.schedule_relisten(self.settings.error_retry_delay);
            }
        }
    }

    fn schedule_relisten(&mut self, delay: std::time::Duration) {
        if self.active {
            self.relisten_at = Some(Instant::now() + delay);
        }
    }

    fn on_outcome(&mut self, outcome: SessionOutcome) {
        match outcome {
            SessionOutcome::Finalized(utterance) => {
                let text = utterance.text.trim();
                if text.is_empty() {
                    tracing::debug!("empty utterance ignored");
                    self.bus.set_state(SessionState::Idle);
                    self.schedule_relisten(self.settings.relisten_delay);
                    return;
                }
                let text = text.to_string();
                self.bus.publish(SessionEvent::UserUtterance(text.clone()));

                if self.exit_pattern.is_match(&text) {
                    tracing::info!("exit phrase heard, conversation loop off");
                    // The farewell is spoken with the loop already off
                    self.active = false;
                    self.relisten_at = None;
                    self.bus.publish(SessionEvent::LoopToggled(false));
                    let farewell = self.settings.farewell.clone();
                    self.bus.publish(SessionEvent::Reply(farewell.clone()));
                    self.speak(&farewell);
                    return;
                }

                self.request_reply(text);
            }
            SessionOutcome::NoInput => {
                self.bus.set_state(SessionState::Idle);
                self.schedule_relisten(self.settings.relisten_delay);
            }
            SessionOutcome::Failed(CaptureErrorKind::NotAllowed) => {
                tracing::warn!("microphone permission denied, conversation loop off");
                let error = Error::Capture(CaptureErrorKind::NotAllowed);
                self.bus.publish(SessionEvent::Error(error.to_string()));
                self.deactivate();
            }
            SessionOutcome::Failed(kind) => {
                self.bus
                    .publish(SessionEvent::Error(Error::Capture(kind).to_string()));
                self.bus.set_state(SessionState::Idle);
                self.schedule_relisten(self.settings.error_retry_delay);
            }
            SessionOutcome::Stopped => {}
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Ask the responder in the background
    fn request_reply(&mut self, query: String) {
        let turn = self.next_id();
        self.pending_turn = Some(turn);
        self.bus.set_state(SessionState::Processing);

        let responder = Arc::clone(&self.responder);
        let history = if self.settings.history_enabled {
            self.history.snapshot()
        } else {
            Vec::new()
        };
        let profile = self.profile.clone();
        let search_enabled = self.settings.search_enabled;
        let limit = self.settings.reply_timeout;
        let tx = self.internal_tx.clone();

        tracing::debug!(turn, history = history.len(), "requesting reply");

        tokio::spawn(async move {
            let request = ResponderRequest {
                query: &query,
                history: &history,
                profile: profile.as_ref(),
                search_enabled,
            };
            let result = tokio::time::timeout(limit, responder.respond(request))
                .await
                .unwrap_or_else(|_| Err(Error::Responder(format!("no reply within {limit:?}"))));
            let _ = tx.send(Internal::ReplyReady {
                turn,
                query,
                result,
            });
        });
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::ReplyReady {
                turn,
                query,
                result,
            } => self.on_reply(turn, &query, result),
            Internal::SpeechDone { run } => self.on_speech_done(run),
        }
    }

    fn on_reply(&mut self, turn: u64, query: &str, result: Result<Reply>) {
        if !self.active || self.pending_turn != Some(turn) {
            tracing::debug!(turn, "stale reply discarded");
            return;
        }
        self.pending_turn = None;

        let reply = match result {
            Ok(reply) => {
                if self.settings.history_enabled {
                    self.history.append_exchange(query, &reply.text);
                }
                reply
            }
            Err(e) => {
                tracing::warn!(turn, error = %e, "responder failed, using fallback reply");
                self.bus.publish(SessionEvent::Error(e.to_string()));
                Reply::chat(self.settings.fallback_reply.clone())
            }
        };

        if reply.command != ResponderCommand::Chat {
            tracing::info!(command = reply.command.name(), "reply carries a command");
            self.bus.publish(SessionEvent::Command(reply.command.clone()));
        }
        if let ResponderCommand::SetTimer { duration_secs } = reply.command {
            self.arm_timer(duration_secs);
        }
        self.bus.publish(SessionEvent::Reply(reply.text.clone()));
        self.speak(&reply.text);
    }

    /// Replaces any countdown already running
    fn arm_timer(&mut self, duration_secs: u64) {
        if duration_secs == 0 {
            return;
        }
        tracing::info!(duration_secs, "timer set");
        self.timer_at = Some(Instant::now() + std::time::Duration::from_secs(duration_secs));
    }

    fn on_timer_expired(&mut self) {
        tracing::info!(active = self.active, "timer finished");

        self.endpointer.stop();
        self.relisten_at = None;
        self.pending_turn = None;

        let message = self.settings.timer_message.clone();
        self.bus.publish(SessionEvent::Reply(message.clone()));
        self.speak(&message);
    }

    fn speak(&mut self, text: &str) {
        let run = self.next_id();
        self.speech_run = Some(run);
        self.bus.set_state(SessionState::Speaking);

        let tx = self.internal_tx.clone();
        self.speaker.speak(text, move || {
            let _ = tx.send(Internal::SpeechDone { run });
        });
    }

    fn on_speech_done(&mut self, run: u64) {
        if self.speech_run != Some(run) {
            tracing::debug!(run, "stale speech completion ignored");
            return;
        }
        self.speech_run = None;
        self.bus.set_state(SessionState::Idle);

        // Let the tail of our own audio die out before listening
        self.schedule_relisten(self.settings.relisten_delay);
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
