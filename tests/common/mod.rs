//! Shared test utilities
//!
//! Fakes for every external capability the voice loop talks to. All of them
//! sleep on Tokio time, so tests run with `start_paused = true` and finish
//! instantly while still observing real ordering and delays.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley::agent::{Reply, Responder, ResponderRequest};
use parley::config::SessionConfig;
use parley::session::{SessionEvent, SessionHandle, SessionState, VoiceSessionController};
use parley::voice::{
    AudioClip, AudioCuePlayer, AudioFormat, AudioOutput, ChannelCapture, EncodedAudio,
    EndpointConfig, Endpointer, LocalSpeech, PCM_SAMPLE_RATE, PlaybackEnd, Speaker,
    SpeechSynthesizer, VoiceParams,
};
use parley::{Error, Result};
use tokio::sync::broadcast;

/// Generous upper bound for anything a test waits on (virtual time)
pub const WAIT: Duration = Duration::from_secs(60);

/// Silent 16-bit PCM lasting `duration`
#[must_use]
pub fn silent_pcm(duration: Duration) -> EncodedAudio {
    let samples = u128::from(PCM_SAMPLE_RATE) * duration.as_millis() / 1000;
    let bytes = usize::try_from(samples * 2).expect("clip too long");
    EncodedAudio::new(
        vec![0; bytes],
        AudioFormat::Pcm16 {
            sample_rate: PCM_SAMPLE_RATE,
        },
    )
}

#[derive(Clone, Copy, Default)]
struct SegmentScript {
    delay: Duration,
    fail: bool,
    empty: bool,
}

/// Synthesizer with scripted per-text latency and failures
pub struct FakeSynth {
    clip: Duration,
    script: HashMap<String, SegmentScript>,
    calls: Mutex<Vec<String>>,
}

impl FakeSynth {
    /// Every synthesized clip lasts `clip`
    #[must_use]
    pub fn new(clip: Duration) -> Self {
        Self {
            clip,
            script: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Delay synthesis of `text`
    #[must_use]
    pub fn delay(mut self, text: &str, delay: Duration) -> Self {
        self.script.entry(text.to_string()).or_default().delay = delay;
        self
    }

    /// Fail synthesis of `text`
    #[must_use]
    pub fn fail(mut self, text: &str) -> Self {
        self.script.entry(text.to_string()).or_default().fail = true;
        self
    }

    /// Return no audio for `text`
    #[must_use]
    pub fn empty(mut self, text: &str) -> Self {
        self.script.entry(text.to_string()).or_default().empty = true;
        self
    }

    /// Texts synthesized so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Option<EncodedAudio>> {
        self.calls.lock().unwrap().push(text.to_string());
        let script = self.script.get(text).copied().unwrap_or_default();

        tokio::time::sleep(script.delay).await;

        if script.fail {
            return Err(Error::Tts(format!("scripted failure for {text:?}")));
        }
        if script.empty {
            return Ok(None);
        }
        Ok(Some(silent_pcm(self.clip)))
    }
}

/// Output device that records what it was asked to play
#[derive(Default)]
pub struct RecordingOutput {
    played: Mutex<Vec<(Option<usize>, usize)>>,
    finished: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Segment indices in the order their playback started
    pub fn played(&self) -> Vec<usize> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(index, _)| *index)
            .collect()
    }

    /// Sample counts of every clip started, cues included
    pub fn clip_lengths(&self) -> Vec<usize> {
        self.played.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }

    /// Clips that played to the end
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn play(&self, clip: AudioClip) -> Result<PlaybackEnd> {
        self.played
            .lock()
            .unwrap()
            .push((clip.segment_index, clip.samples.len()));
        tokio::time::sleep(clip.duration()).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(PlaybackEnd::Finished)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Local synthesizer that takes a fixed time per utterance
pub struct RecordingSpeech {
    duration: Duration,
    spoken: Mutex<Vec<String>>,
    finished: AtomicUsize,
}

impl RecordingSpeech {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            spoken: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
        }
    }

    /// Texts whose speech started
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Utterances spoken to the end
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalSpeech for RecordingSpeech {
    async fn speak(&self, text: &str, _params: &VoiceParams) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.duration).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A recorded responder call
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub query: String,
    pub history_len: usize,
    pub search_enabled: bool,
}

/// Responder answering from a script
///
/// Answers "Dạ." once the script runs out.
pub struct ScriptedResponder {
    delay: Duration,
    replies: Mutex<VecDeque<Result<Reply>>>,
    queries: Mutex<Vec<RecordedQuery>>,
}

impl ScriptedResponder {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            replies: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn reply(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    #[must_use]
    pub fn fail(self) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(Error::Responder("scripted outage".into())));
        self
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, request: ResponderRequest<'_>) -> Result<Reply> {
        self.queries.lock().unwrap().push(RecordedQuery {
            query: request.query.to_string(),
            history_len: request.history.len(),
            search_enabled: request.search_enabled,
        });
        tokio::time::sleep(self.delay).await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Reply::chat("Dạ.")))
    }
}

/// A running controller wired to fakes
pub struct Harness {
    pub capture: ChannelCapture,
    pub speech: Arc<RecordingSpeech>,
    pub responder: Arc<ScriptedResponder>,
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    /// Start a controller speaking through `speech` and answering with `responder`
    pub fn start(
        settings: SessionConfig,
        speech: RecordingSpeech,
        responder: ScriptedResponder,
    ) -> Self {
        let capture = ChannelCapture::new();
        let endpointer = Endpointer::new(
            Some(Arc::new(capture.clone())),
            AudioCuePlayer::silent(),
            EndpointConfig::default(),
        );
        let speech = Arc::new(speech);
        let responder = Arc::new(responder);
        let speaker = Arc::new(Speaker::local(
            Arc::clone(&speech) as Arc<dyn LocalSpeech>,
            VoiceParams::default(),
        ));

        let (controller, handle) = VoiceSessionController::new(
            endpointer,
            speaker,
            Arc::clone(&responder) as Arc<dyn Responder>,
            settings,
            None,
        )
        .expect("valid settings");
        let events = handle.subscribe();
        controller.spawn();

        Self {
            capture,
            speech,
            responder,
            handle,
            events,
        }
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for(&self, state: SessionState) {
        wait_for_state(&self.handle, state).await;
    }

    /// Say `text` into the open listening session
    pub async fn say(&self, text: &str) {
        self.wait_for(SessionState::Listening).await;
        assert!(self.capture.partial(text).await, "capture not open");
        assert!(self.capture.finalize(text).await, "capture not open");
    }

    /// Every event published so far
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// State transitions published so far
    pub fn drain_states(&mut self) -> Vec<SessionState> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect()
    }
}

/// Wait until `handle` reports `state`
pub async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
        .expect("session closed");
}
