//! Capture capability: a live stream of transcription events
//!
//! Host-specific recognizers implement [`CaptureSource`]. [`ChannelCapture`]
//! is a host-fed implementation: whatever drives recognition (a UI, a
//! terminal, a test) pushes events into the open session.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::Result;

/// Buffered capture events per session
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Kind of error reported by a capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureErrorKind {
    /// The recognizer heard nothing before giving up
    NoSpeech,
    /// The session was aborted by the recognizer
    Aborted,
    /// Microphone could not be opened or failed mid-session
    AudioCapture,
    /// Recognition service unreachable
    Network,
    /// Microphone permission denied
    NotAllowed,
    /// Anything else the recognizer reports
    Other(String),
}

impl CaptureErrorKind {
    /// Transient errors end the session quietly; everything else is surfaced
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NoSpeech)
    }
}

impl fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpeech => f.write_str("no speech"),
            Self::Aborted => f.write_str("aborted"),
            Self::AudioCapture => f.write_str("audio capture failed"),
            Self::Network => f.write_str("network"),
            Self::NotAllowed => f.write_str("not allowed"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Event produced by a capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Interim transcription; replaces any earlier interim text
    Partial(String),
    /// Recognizer committed the utterance
    Final(String),
    /// Recognizer error
    Error(CaptureErrorKind),
    /// Recognizer confirmed it is listening
    SessionStarted,
    /// Recognizer closed the session
    SessionEnded,
}

/// Source of transcription events
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Open a capture session for `locale`
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot be started
    async fn start(&self, locale: &str) -> Result<mpsc::Receiver<CaptureEvent>>;

    /// Close the current session, if any
    fn stop(&self);
}

#[derive(Default)]
struct ChannelState {
    sender: Option<mpsc::Sender<CaptureEvent>>,
    locale: Option<String>,
}

/// Capture source fed by the host
///
/// Cloning yields another handle to the same capture.
#[derive(Clone, Default)]
pub struct ChannelCapture {
    state: Arc<Mutex<ChannelState>>,
    opened: Arc<Notify>,
}

impl ChannelCapture {
    /// Create a capture with no open session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event into the open session
    ///
    /// Waits while the session's buffer is full, so no event is dropped.
    /// Returns false if no session is open or it closed before delivery.
    pub async fn push(&self, event: CaptureEvent) -> bool {
        let sender = self
            .state
            .lock()
            .ok()
            .and_then(|state| state.sender.clone());
        let Some(sender) = sender else {
            return false;
        };
        sender.send(event).await.is_ok()
    }

    /// Push a partial transcription
    pub async fn partial(&self, text: impl Into<String>) -> bool {
        self.push(CaptureEvent::Partial(text.into())).await
    }

    /// Push a final transcription
    pub async fn finalize(&self, text: impl Into<String>) -> bool {
        self.push(CaptureEvent::Final(text.into())).await
    }

    /// Report a recognizer error
    pub async fn fail(&self, kind: CaptureErrorKind) -> bool {
        self.push(CaptureEvent::Error(kind)).await
    }

    /// End the open session from the recognizer side
    pub async fn end(&self) -> bool {
        let sent = self.push(CaptureEvent::SessionEnded).await;
        if let Ok(mut state) = self.state.lock() {
            state.sender = None;
        }
        sent
    }

    /// Whether a session is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .is_ok_and(|state| state.sender.as_ref().is_some_and(|tx| !tx.is_closed()))
    }

    /// Locale of the most recently opened session
    #[must_use]
    pub fn locale(&self) -> Option<String> {
        self.state.lock().ok().and_then(|state| state.locale.clone())
    }

    /// Wait until a session is opened
    ///
    /// Each opened session releases exactly one waiter, including a waiter
    /// that arrives after the session was opened.
    pub async fn session_opened(&self) {
        self.opened.notified().await;
    }
}

#[async_trait]
impl CaptureSource for ChannelCapture {
    async fn start(&self, locale: &str) -> Result<mpsc::Receiver<CaptureEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        // The host-fed recognizer is ready as soon as the channel exists
        let _ = tx.try_send(CaptureEvent::SessionStarted);

        if let Ok(mut state) = self.state.lock() {
            state.sender = Some(tx);
            state.locale = Some(locale.to_string());
        }
        self.opened.notify_one();

        tracing::debug!(locale, "capture session opened");
        Ok(rx)
    }

    fn stop(&self) {
        if let Ok(mut state) = self.state.lock()
            && state.sender.take().is_some()
        {
            tracing::debug!("capture session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_announces_session() {
        let capture = ChannelCapture::new();
        let mut rx = capture.start("vi-VN").await.unwrap();

        assert_eq!(rx.recv().await, Some(CaptureEvent::SessionStarted));
        assert_eq!(capture.locale().as_deref(), Some("vi-VN"));
        assert!(capture.is_open());
    }

    #[tokio::test]
    async fn push_without_session_is_rejected() {
        let capture = ChannelCapture::new();
        assert!(!capture.partial("xin").await);
        assert!(!capture.is_open());
    }

    #[tokio::test]
    async fn stop_closes_stream() {
        let capture = ChannelCapture::new();
        let mut rx = capture.start("en-US").await.unwrap();
        assert!(capture.partial("hello").await);
        capture.stop();

        assert_eq!(rx.recv().await, Some(CaptureEvent::SessionStarted));
        assert_eq!(rx.recv().await, Some(CaptureEvent::Partial("hello".into())));
        assert_eq!(rx.recv().await, None);
        assert!(!capture.partial("ignored").await);
    }

    #[tokio::test]
    async fn end_sends_session_ended() {
        let capture = ChannelCapture::new();
        let mut rx = capture.start("en-US").await.unwrap();
        assert!(capture.end().await);

        assert_eq!(rx.recv().await, Some(CaptureEvent::SessionStarted));
        assert_eq!(rx.recv().await, Some(CaptureEvent::SessionEnded));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_waits_instead_of_dropping() {
        let capture = ChannelCapture::new();
        let mut rx = capture.start("vi-VN").await.unwrap();

        let feeder = capture.clone();
        let burst = tokio::spawn(async move {
            for n in 0..EVENT_CHANNEL_CAPACITY * 2 {
                assert!(feeder.partial(format!("partial {n}")).await);
            }
            feeder.finalize("done").await
        });

        assert_eq!(rx.recv().await, Some(CaptureEvent::SessionStarted));
        for n in 0..EVENT_CHANNEL_CAPACITY * 2 {
            assert_eq!(rx.recv().await, Some(CaptureEvent::Partial(format!("partial {n}"))));
        }
        assert_eq!(rx.recv().await, Some(CaptureEvent::Final("done".into())));
        assert!(burst.await.unwrap());
    }

    #[test]
    fn only_no_speech_is_transient() {
        assert!(CaptureErrorKind::NoSpeech.is_transient());
        assert!(!CaptureErrorKind::Network.is_transient());
        assert!(!CaptureErrorKind::Other("boom".into()).is_transient());
    }
}
