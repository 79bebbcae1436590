//! Short feedback tones at listening boundaries

use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use super::playback::{AudioClip, AudioOutput};

/// Sample rate for generated tones
const CUE_SAMPLE_RATE: u32 = 24000;

/// Peak amplitude of a cue
const CUE_GAIN: f32 = 0.05;

/// Gain the envelope decays to by the end of the tone
const CUE_FLOOR: f32 = 0.000_01;

/// Feedback tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// The recognizer is listening
    Listening,
    /// The utterance was committed and is being processed
    Processing,
}

impl Cue {
    /// Tone frequency in Hz
    #[must_use]
    pub const fn frequency(self) -> f32 {
        match self {
            Self::Listening => 440.0,
            Self::Processing => 880.0,
        }
    }

    /// Tone length
    #[must_use]
    pub const fn duration(self) -> Duration {
        match self {
            Self::Listening => Duration::from_millis(80),
            Self::Processing => Duration::from_millis(100),
        }
    }

    /// Render the tone: a sine with an exponential fade-out
    #[must_use]
    pub fn render(self) -> AudioClip {
        let count = usize::try_from(
            u128::from(CUE_SAMPLE_RATE) * self.duration().as_millis() / 1000,
        )
        .unwrap_or(0);
        let decay = (CUE_FLOOR / CUE_GAIN).ln();
        let freq = self.frequency();

        #[allow(clippy::cast_precision_loss)]
        let samples = (0..count)
            .map(|i| {
                let t = i as f32 / CUE_SAMPLE_RATE as f32;
                let progress = i as f32 / count as f32;
                CUE_GAIN * (decay * progress).exp() * (2.0 * PI * freq * t).sin()
            })
            .collect();

        AudioClip {
            segment_index: None,
            samples,
            sample_rate: CUE_SAMPLE_RATE,
        }
    }
}

/// Fires cue tones without waiting for them
#[derive(Clone, Default)]
pub struct AudioCuePlayer {
    output: Option<Arc<dyn AudioOutput>>,
}

impl AudioCuePlayer {
    /// Play cues on `output`
    #[must_use]
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output: Some(output),
        }
    }

    /// A player that never makes a sound
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    /// Fire a cue; failures are logged and otherwise ignored
    pub fn fire(&self, cue: Cue) {
        let Some(output) = self.output.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::trace!(?cue, "no runtime, cue dropped");
            return;
        };

        runtime.spawn(async move {
            if let Err(e) = output.play(cue.render()).await {
                tracing::debug!(error = %e, ?cue, "cue playback failed");
            }
        });
    }
}
