//! Segment-by-segment speech playback with look-ahead synthesis
//!
//! While segment `i` plays, the audio for the next `lookahead` segments is
//! already being fetched. Playback itself is strictly in index order: segment
//! `i + 1` starts only after segment `i` finished playing or was skipped.
//!
//! ```text
//!   fetch:   [0][1][2]      [3]      [4]
//!   play:       [==0==][==1==][==2==][==3==][==4==]
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::playback::{AudioClip, AudioOutput};
use super::segment::Segment;
use super::synth::SpeechSynthesizer;

/// Default number of segments fetched ahead of the one playing
pub const DEFAULT_LOOKAHEAD: usize = 2;

/// Default limit on one segment's synthesis; a slower segment is skipped
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Source of run IDs shared by every kind of speech run
static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_run_id() -> u64 {
    NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to one in-flight speech run
///
/// Cloning yields another handle to the same run.
#[derive(Clone)]
pub struct PipelineHandle {
    id: u64,
    token: CancellationToken,
    done: Arc<AtomicBool>,
    output: Option<Arc<dyn AudioOutput>>,
}

impl PipelineHandle {
    pub(crate) fn new(output: Option<Arc<dyn AudioOutput>>) -> Self {
        Self {
            id: next_run_id(),
            token: CancellationToken::new(),
            done: Arc::new(AtomicBool::new(false)),
            output,
        }
    }

    /// Unique ID of this run
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Stop the run and silence its audio
    ///
    /// Idempotent. A cancelled run never reports completion, and fetches
    /// still in flight have their results discarded.
    pub fn cancel(&self) {
        if self.done.load(Ordering::SeqCst) || self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        if let Some(output) = &self.output {
            output.stop();
        }
        tracing::debug!(run = self.id, "speech run cancelled");
    }

    /// Whether the run was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the run is still speaking
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.done.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Mark natural completion; returns false if the run was cancelled first
    pub(crate) fn finish(&self) -> bool {
        self.done.store(true, Ordering::SeqCst);
        !self.token.is_cancelled()
    }
}

/// Plays reply segments through a streaming synthesizer
pub struct SpeechSynthesisPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    voice: String,
    lookahead: usize,
    fetch_timeout: Duration,
    active: Mutex<Option<PipelineHandle>>,
}

impl SpeechSynthesisPipeline {
    /// Create a pipeline fetching `lookahead` segments ahead of playback
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        voice: impl Into<String>,
        lookahead: usize,
    ) -> Self {
        Self {
            synthesizer,
            output,
            voice: voice.into(),
            lookahead,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            active: Mutex::new(None),
        }
    }

    /// Give up on a segment whose synthesis takes longer than `timeout`
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Speak `segments` in order, then call `on_complete`
    ///
    /// Any run already in progress is cancelled first. `on_complete` is
    /// called exactly once when the last segment has played or been
    /// skipped, and never if the run is cancelled. Must be called from
    /// within a Tokio runtime.
    pub fn play<F>(&self, segments: Vec<Segment>, on_complete: F) -> PipelineHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        let handle = PipelineHandle::new(Some(Arc::clone(&self.output)));
        if let Ok(mut active) = self.active.lock() {
            *active = Some(handle.clone());
        }

        tracing::debug!(
            run = handle.id(),
            segments = segments.len(),
            lookahead = self.lookahead,
            "speech pipeline started"
        );

        let run = Run {
            synthesizer: Arc::clone(&self.synthesizer),
            output: Arc::clone(&self.output),
            voice: self.voice.clone(),
            lookahead: self.lookahead,
            fetch_timeout: self.fetch_timeout,
            handle: handle.clone(),
        };
        tokio::spawn(run.execute(segments, on_complete));

        handle
    }

    /// Cancel the run in progress, if any
    pub fn cancel(&self) {
        let previous = self.active.lock().ok().and_then(|mut active| active.take());
        if let Some(handle) = previous {
            handle.cancel();
        }
    }

    /// Whether a run is currently speaking
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(PipelineHandle::is_active))
            .unwrap_or(false)
    }
}

/// State owned by one spawned pipeline run
struct Run {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    voice: String,
    lookahead: usize,
    fetch_timeout: Duration,
    handle: PipelineHandle,
}

impl Run {
    async fn execute<F>(self, segments: Vec<Segment>, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.handle.token().clone();
        let total = segments.len();
        let mut fetches: VecDeque<JoinHandle<Option<AudioClip>>> = VecDeque::new();
        let mut next_fetch = 0;
        let mut played = 0;

        for index in 0..total {
            while next_fetch < total && next_fetch <= index + self.lookahead {
                fetches.push_back(self.fetch(&segments[next_fetch]));
                next_fetch += 1;
            }
            let Some(fetch) = fetches.pop_front() else {
                break;
            };

            // Dropping a pending fetch detaches it; its result is never read
            let clip = tokio::select! {
                biased;
                () = token.cancelled() => return,
                result = fetch => result.ok().flatten(),
            };
            if token.is_cancelled() {
                return;
            }

            let Some(clip) = clip else {
                tracing::debug!(run = self.handle.id(), index, "segment skipped");
                continue;
            };

            let result = tokio::select! {
                biased;
                () = token.cancelled() => return,
                result = self.output.play(clip) => result,
            };
            match result {
                Ok(_) => played += 1,
                Err(e) => {
                    tracing::warn!(run = self.handle.id(), index, error = %e, "segment playback failed");
                }
            }
        }

        if self.handle.finish() {
            tracing::debug!(run = self.handle.id(), played, total, "speech pipeline complete");
            on_complete();
        }
    }

    /// Start synthesizing a segment in the background
    fn fetch(&self, segment: &Segment) -> JoinHandle<Option<AudioClip>> {
        let synthesizer = Arc::clone(&self.synthesizer);
        let token = self.handle.token().clone();
        let voice = self.voice.clone();
        let text = segment.text.clone();
        let index = segment.index;
        let limit = self.fetch_timeout;

        tokio::spawn(async move {
            let fetched = tokio::time::timeout(limit, synthesizer.synthesize(&text, &voice)).await;
            let audio = match fetched {
                Ok(Ok(Some(audio))) => audio,
                Ok(Ok(None)) => {
                    tracing::debug!(index, "no audio for segment");
                    return None;
                }
                Ok(Err(e)) => {
                    tracing::warn!(index, error = %e, "segment synthesis failed");
                    return None;
                }
                Err(_) => {
                    tracing::warn!(index, timeout = ?limit, "segment synthesis timed out");
                    return None;
                }
            };

            if token.is_cancelled() {
                return None;
            }

            AudioClip::decode(&audio, Some(index))
                .map_err(|e| tracing::warn!(index, error = %e, "segment decode failed"))
                .ok()
        })
    }
}
