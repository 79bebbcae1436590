//! Speech output: streaming pipeline or local synthesizer
//!
//! Whichever backend is configured, at most one reply is audible at a time.

use std::sync::{Arc, Mutex};

use super::local::{LocalSpeech, VoiceParams};
use super::pipeline::{PipelineHandle, SpeechSynthesisPipeline};
use super::segment::segment;

enum Backend {
    Streaming(SpeechSynthesisPipeline),
    Local {
        speech: Arc<dyn LocalSpeech>,
        params: VoiceParams,
    },
}

/// Speaks replies, cancelling any reply still in progress
pub struct Speaker {
    backend: Backend,
    active: Mutex<Option<PipelineHandle>>,
}

impl Speaker {
    /// Speak through a streaming synthesis pipeline
    #[must_use]
    pub fn streaming(pipeline: SpeechSynthesisPipeline) -> Self {
        Self {
            backend: Backend::Streaming(pipeline),
            active: Mutex::new(None),
        }
    }

    /// Speak through the local synthesizer
    #[must_use]
    pub fn local(speech: Arc<dyn LocalSpeech>, params: VoiceParams) -> Self {
        Self {
            backend: Backend::Local { speech, params },
            active: Mutex::new(None),
        }
    }

    /// Speak `text`, calling `on_complete` when it has been spoken
    ///
    /// Cancels whatever was being spoken. `on_complete` is not called if
    /// the returned run is cancelled.
    pub fn speak<F>(&self, text: &str, on_complete: F) -> PipelineHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        let handle = match &self.backend {
            Backend::Streaming(pipeline) => pipeline.play(segment(text), on_complete),
            Backend::Local { speech, params } => {
                speak_local(Arc::clone(speech), params.clone(), text, on_complete)
            }
        };

        if let Ok(mut active) = self.active.lock() {
            *active = Some(handle.clone());
        }
        handle
    }

    /// Stop speaking
    pub fn cancel(&self) {
        let previous = self.active.lock().ok().and_then(|mut active| active.take());
        if let Some(handle) = previous {
            handle.cancel();
        }
    }

    /// Whether a reply is currently being spoken
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(PipelineHandle::is_active))
            .unwrap_or(false)
    }

    /// Whether replies go through the streaming pipeline
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self.backend, Backend::Streaming(_))
    }
}

fn speak_local<F>(
    speech: Arc<dyn LocalSpeech>,
    params: VoiceParams,
    text: &str,
    on_complete: F,
) -> PipelineHandle
where
    F: FnOnce() + Send + 'static,
{
    let handle = PipelineHandle::new(None);
    let run = handle.clone();
    let text = text.to_string();

    tokio::spawn(async move {
        // Dropping the speak future on cancel stops the synthesizer
        let result = tokio::select! {
            biased;
            () = run.token().cancelled() => return,
            result = speech.speak(&text, &params) => result,
        };
        if let Err(e) = result {
            tracing::warn!(run = run.id(), error = %e, "local speech failed");
        }
        if run.finish() {
            on_complete();
        }
    });

    handle
}
