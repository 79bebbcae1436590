//! Endpointing: deciding when the user has finished speaking
//!
//! A listening session ends in exactly one way: an explicit final result,
//! silence after the last partial result, or an error/stop. Once a session
//! has ended the endpointer is idle and ignores anything the recognizer
//! still delivers.
//!
//! ```text
//!            start()            Final / silence timeout
//!   Idle ─────────────▶ Listening ─────────────────────▶ Idle (utterance)
//!                           │
//!                           └── Error / SessionEnded / stop() ──▶ Idle (no utterance)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use super::capture::{CaptureErrorKind, CaptureEvent, CaptureSource};
use super::cue::{AudioCuePlayer, Cue};
use crate::{Error, Result};

/// Silence after the last partial result that commits the utterance
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_millis(600);

/// What committed an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizedBy {
    /// The recognizer delivered a final result
    ExplicitFinal,
    /// No new partial result arrived within the silence timeout
    SilenceTimeout,
}

/// A committed user utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub finalized_by: FinalizedBy,
}

/// How a listening session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The user said something
    Finalized(Utterance),
    /// The session closed without input (silence, "no speech")
    NoInput,
    /// The recognizer failed
    Failed(CaptureErrorKind),
    /// The session was stopped, or none was open
    Stopped,
}

/// Observable endpointer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointPhase {
    Idle,
    Listening,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Listening {
        interim: String,
        /// Pending silence finalize, re-armed by every partial result
        deadline: Option<Instant>,
    },
}

/// Endpointer configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub silence_timeout: Duration,
    /// Recognition locale, e.g. `vi-VN`
    pub locale: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            locale: "vi-VN".to_string(),
        }
    }
}

/// Callback receiving each interim transcription
pub type TranscriptHook = Box<dyn Fn(&str) + Send + Sync>;

/// Turns a stream of capture events into at most one utterance per session
pub struct Endpointer {
    capture: Option<Arc<dyn CaptureSource>>,
    cues: AudioCuePlayer,
    config: EndpointConfig,
    phase: Phase,
    events: Option<mpsc::Receiver<CaptureEvent>>,
    partials: usize,
    on_transcript: Option<TranscriptHook>,
}

enum Step {
    Event(Option<CaptureEvent>),
    Silence,
}

impl Endpointer {
    /// Create an endpointer; `capture` is `None` when the host has no recognizer
    #[must_use]
    pub fn new(
        capture: Option<Arc<dyn CaptureSource>>,
        cues: AudioCuePlayer,
        config: EndpointConfig,
    ) -> Self {
        Self {
            capture,
            cues,
            config,
            phase: Phase::Idle,
            events: None,
            partials: 0,
            on_transcript: None,
        }
    }

    /// Report interim transcriptions to `hook`
    #[must_use]
    pub fn with_transcript_hook(
        mut self,
        hook: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Box::new(hook));
        self
    }

    /// Open a listening session
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureUnavailable`] if there is no capture source,
    /// or the capture source's error if it fails to start
    pub async fn start(&mut self) -> Result<()> {
        let Some(capture) = self.capture.clone() else {
            return Err(Error::CaptureUnavailable);
        };

        self.stop();
        self.partials = 0;

        let events = capture.start(&self.config.locale).await?;
        self.events = Some(events);
        self.phase = Phase::Listening {
            interim: String::new(),
            deadline: None,
        };

        tracing::debug!(locale = %self.config.locale, "listening");
        Ok(())
    }

    /// Apply one capture event
    ///
    /// Returns the session outcome if this event ended the session.
    pub fn on_event(&mut self, event: CaptureEvent) -> Option<SessionOutcome> {
        let Phase::Listening { interim, deadline } = &mut self.phase else {
            tracing::trace!(?event, "capture event after session end ignored");
            return None;
        };

        match event {
            CaptureEvent::SessionStarted => {
                self.cues.fire(Cue::Listening);
                None
            }
            CaptureEvent::Partial(text) => {
                self.partials += 1;
                // Only non-blank interim text can be finalized on silence
                *deadline = (!text.trim().is_empty())
                    .then(|| Instant::now() + self.config.silence_timeout);
                if let Some(hook) = &self.on_transcript {
                    hook(&text);
                }
                *interim = text;
                None
            }
            CaptureEvent::Final(text) => Some(self.finalize(text, FinalizedBy::ExplicitFinal)),
            CaptureEvent::Error(kind) if kind.is_transient() => {
                tracing::debug!(%kind, "capture ended without speech");
                Some(self.end(SessionOutcome::NoInput))
            }
            CaptureEvent::Error(kind) => {
                tracing::warn!(%kind, "capture error");
                Some(self.end(SessionOutcome::Failed(kind)))
            }
            CaptureEvent::SessionEnded => Some(self.end(SessionOutcome::NoInput)),
        }
    }

    /// Finalize on silence if the pending deadline has passed
    fn on_silence(&mut self) -> Option<SessionOutcome> {
        let Phase::Listening { interim, deadline } = &mut self.phase else {
            return None;
        };
        if deadline.is_none_or(|at| Instant::now() < at) {
            return None;
        }

        let text = std::mem::take(interim);
        tracing::debug!(partials = self.partials, "silence detected, finalizing");
        Some(self.finalize(text, FinalizedBy::SilenceTimeout))
    }

    /// Wait for the open session to end
    ///
    /// Cancel-safe: dropping the future loses no events. Returns
    /// [`SessionOutcome::Stopped`] immediately if no session is open.
    pub async fn next_outcome(&mut self) -> SessionOutcome {
        loop {
            let Phase::Listening { deadline, .. } = &self.phase else {
                return SessionOutcome::Stopped;
            };
            let deadline = *deadline;
            let Some(events) = self.events.as_mut() else {
                return SessionOutcome::Stopped;
            };

            // Events win ties so a final result beats a due silence timer
            let step = tokio::select! {
                biased;
                event = events.recv() => Step::Event(event),
                () = sleep_until_some(deadline) => Step::Silence,
            };

            let outcome = match step {
                Step::Event(Some(event)) => self.on_event(event),
                Step::Event(None) => Some(self.end(SessionOutcome::NoInput)),
                Step::Silence => self.on_silence(),
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    /// Close the session without an utterance
    pub fn stop(&mut self) {
        if matches!(self.phase, Phase::Listening { .. }) {
            tracing::debug!("listening stopped");
        }
        self.close();
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> EndpointPhase {
        match self.phase {
            Phase::Idle => EndpointPhase::Idle,
            Phase::Listening { .. } => EndpointPhase::Listening,
        }
    }

    /// Whether a session is open
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        matches!(self.phase, Phase::Listening { .. })
    }

    /// Latest interim transcription of the open session
    #[must_use]
    pub fn interim(&self) -> Option<&str> {
        match &self.phase {
            Phase::Listening { interim, .. } => Some(interim),
            Phase::Idle => None,
        }
    }

    /// Partial results seen in the current session
    #[must_use]
    pub const fn partials(&self) -> usize {
        self.partials
    }

    fn finalize(&mut self, text: String, finalized_by: FinalizedBy) -> SessionOutcome {
        self.close();
        self.cues.fire(Cue::Processing);
        tracing::info!(text, ?finalized_by, "utterance finalized");
        SessionOutcome::Finalized(Utterance { text, finalized_by })
    }

    fn end(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.close();
        outcome
    }

    /// Terminal transition: back to idle, recognizer released
    fn close(&mut self) {
        let was_listening = matches!(self.phase, Phase::Listening { .. });
        self.phase = Phase::Idle;
        self.events = None;
        if was_listening && let Some(capture) = &self.capture {
            capture.stop();
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::ChannelCapture;

    fn endpointer(capture: &ChannelCapture) -> Endpointer {
        Endpointer::new(
            Some(Arc::new(capture.clone())),
            AudioCuePlayer::silent(),
            EndpointConfig::default(),
        )
    }

    #[tokio::test]
    async fn start_without_capture_fails() {
        let mut endpointer =
            Endpointer::new(None, AudioCuePlayer::silent(), EndpointConfig::default());
        assert!(matches!(
            endpointer.start().await,
            Err(Error::CaptureUnavailable)
        ));
        assert_eq!(endpointer.phase(), EndpointPhase::Idle);
    }

    #[tokio::test]
    async fn final_result_finalizes_once() {
        let capture = ChannelCapture::new();
        let mut endpointer = endpointer(&capture);
        endpointer.start().await.unwrap();

        let outcome = endpointer.on_event(CaptureEvent::Final("xin chào".into()));
        assert_eq!(
            outcome,
            Some(SessionOutcome::Finalized(Utterance {
                text: "xin chào".into(),
                finalized_by: FinalizedBy::ExplicitFinal,
            }))
        );
        assert_eq!(endpointer.phase(), EndpointPhase::Idle);
        assert!(!capture.is_open());

        assert_eq!(endpointer.on_event(CaptureEvent::Final("again".into())), None);
        assert_eq!(endpointer.on_event(CaptureEvent::SessionEnded), None);
    }

    #[tokio::test]
    async fn no_speech_is_quiet() {
        let capture = ChannelCapture::new();
        let mut endpointer = endpointer(&capture);
        endpointer.start().await.unwrap();

        let outcome = endpointer.on_event(CaptureEvent::Error(CaptureErrorKind::NoSpeech));
        assert_eq!(outcome, Some(SessionOutcome::NoInput));
    }

    #[tokio::test]
    async fn hard_error_is_surfaced() {
        let capture = ChannelCapture::new();
        let mut endpointer = endpointer(&capture);
        endpointer.start().await.unwrap();
        endpointer.on_event(CaptureEvent::Partial("xin".into()));

        let outcome = endpointer.on_event(CaptureEvent::Error(CaptureErrorKind::Network));
        assert_eq!(
            outcome,
            Some(SessionOutcome::Failed(CaptureErrorKind::Network))
        );
    }

    #[tokio::test]
    async fn session_end_without_final_emits_nothing() {
        let capture = ChannelCapture::new();
        let mut endpointer = endpointer(&capture);
        endpointer.start().await.unwrap();
        endpointer.on_event(CaptureEvent::Partial("xin".into()));

        assert_eq!(
            endpointer.on_event(CaptureEvent::SessionEnded),
            Some(SessionOutcome::NoInput)
        );
    }

    #[tokio::test]
    async fn start_resets_counters() {
        let capture = ChannelCapture::new();
        let mut endpointer = endpointer(&capture);
        endpointer.start().await.unwrap();
        endpointer.on_event(CaptureEvent::Partial("a".into()));
        endpointer.on_event(CaptureEvent::Partial("ab".into()));
        assert_eq!(endpointer.partials(), 2);
        assert_eq!(endpointer.interim(), Some("ab"));

        endpointer.start().await.unwrap();
        assert_eq!(endpointer.partials(), 0);
        assert_eq!(endpointer.interim(), Some(""));
    }

    #[tokio::test]
    async fn partials_reach_transcript_hook() {
        let capture = ChannelCapture::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut endpointer = endpointer(&capture)
            .with_transcript_hook(move |text| sink.lock().unwrap().push(text.to_string()));
        endpointer.start().await.unwrap();

        endpointer.on_event(CaptureEvent::Partial("xin".into()));
        endpointer.on_event(CaptureEvent::Partial("xin chào".into()));

        assert_eq!(*seen.lock().unwrap(), vec!["xin", "xin chào"]);
    }

    #[tokio::test]
    async fn next_outcome_when_idle_is_stopped() {
        let capture = ChannelCapture::new();
        let mut endpointer = endpointer(&capture);
        assert_eq!(endpointer.next_outcome().await, SessionOutcome::Stopped);
    }
}
