//! Audio playback to speakers
//!
//! Every clip plays on its own output stream so that [`AudioOutput::stop`]
//! can silence whatever is sounding without tearing down the device.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Sample rate of raw PCM returned by streaming TTS providers
pub const PCM_SAMPLE_RATE: u32 = 24000;

/// Poll interval while waiting for a stream to drain
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period past the clip length before giving up on the device
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Encoding of synthesized audio bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// MPEG layer 3
    Mp3,
    /// RIFF WAVE
    Wav,
    /// Headerless signed 16-bit little-endian mono
    Pcm16 {
        /// Samples per second
        sample_rate: u32,
    },
}

/// Synthesized audio as returned by a provider
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

impl EncodedAudio {
    #[must_use]
    pub const fn new(bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self { bytes, format }
    }
}

/// Decoded mono audio ready for the output device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Reply segment this clip speaks, `None` for cue tones
    pub segment_index: Option<usize>,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Decode provider audio into a clip
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid audio of the given format
    pub fn decode(audio: &EncodedAudio, segment_index: Option<usize>) -> Result<Self> {
        let (samples, sample_rate) = match audio.format {
            AudioFormat::Mp3 => decode_mp3(&audio.bytes)?,
            AudioFormat::Wav => decode_wav(&audio.bytes)?,
            AudioFormat::Pcm16 { sample_rate } => (decode_pcm16(&audio.bytes), sample_rate),
        };

        Ok(Self {
            segment_index,
            samples,
            sample_rate,
        })
    }

    /// Playback length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// How a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The clip played to the end
    Finished,
    /// [`AudioOutput::stop`] silenced the clip
    Stopped,
}

/// Audio output device
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play a clip, resolving when it finishes or is stopped
    ///
    /// Dropping the returned future silences the clip.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot play the clip
    async fn play(&self, clip: AudioClip) -> Result<PlaybackEnd>;

    /// Immediately silence every clip currently sounding
    fn stop(&self);
}

/// Plays audio to the default output device
pub struct CpalOutput {
    /// Bumped by `stop()`; a playback started under an older value halts
    epoch: Arc<AtomicU64>,
}

impl CpalOutput {
    /// Create a new playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self {
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }
}

/// Sets the halt flag when the playback future is dropped
struct HaltOnDrop(Arc<AtomicBool>);

impl Drop for HaltOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn play(&self, clip: AudioClip) -> Result<PlaybackEnd> {
        if clip.samples.is_empty() {
            return Ok(PlaybackEnd::Finished);
        }

        let halt = Arc::new(AtomicBool::new(false));
        let _guard = HaltOnDrop(Arc::clone(&halt));
        let epoch = Arc::clone(&self.epoch);
        let started = epoch.load(Ordering::SeqCst);
        let (done_tx, done_rx) = oneshot::channel();

        // cpal streams aren't Send, so each clip lives on its own thread
        std::thread::spawn(move || {
            let stopped = || halt.load(Ordering::SeqCst) || epoch.load(Ordering::SeqCst) != started;
            let _ = done_tx.send(play_blocking(&clip, &stopped));
        });

        done_rx
            .await
            .map_err(|_| Error::Audio("playback thread exited".to_string()))?
    }

    fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("playback stopped");
    }
}

/// Play a clip on the current thread until it drains or `stopped` says so
fn play_blocking(clip: &AudioClip, stopped: &dyn Fn() -> bool) -> Result<PlaybackEnd> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = output_config(&device, clip.sample_rate)?;
    let channels = usize::from(config.channels);

    let samples: Arc<[f32]> = clip.samples.clone().into();
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Release);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let start = Instant::now();
    let timeout = clip.duration() + DRAIN_TIMEOUT;
    let end = loop {
        if stopped() {
            break PlaybackEnd::Stopped;
        }
        if finished.load(Ordering::Acquire) || start.elapsed() > timeout {
            break PlaybackEnd::Finished;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    drop(stream);
    tracing::trace!(
        samples = samples.len(),
        segment = ?clip.segment_index,
        ?end,
        "playback complete"
    );

    Ok(end)
}

/// Pick a mono (or stereo) output config at `sample_rate`
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };

    supports(1)
        .or_else(|| supports(2))
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| Error::Audio(format!("no output config supports {sample_rate} Hz")))
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PCM_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if let Ok(rate) = u32::try_from(frame.sample_rate) {
                    sample_rate = rate;
                }
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(mix_down_i16));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Decode WAV bytes to mono f32 samples
#[allow(clippy::cast_precision_loss)]
fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((samples, spec.sample_rate))
}

/// Decode headerless little-endian PCM16
fn decode_pcm16(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Average one interleaved i16 frame into a single f32 sample
fn mix_down_i16(frame: &[i16]) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let len = frame.len().max(1) as f32;
    frame.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>() / len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_decodes_little_endian() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0xFF, 0x7F];
        let samples = decode_pcm16(&bytes);
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 0.5).abs() < 1e-6);
        assert!((samples[1] + 0.5).abs() < 1e-6);
        assert!(samples[2] > 0.99);
    }

    #[test]
    fn pcm16_ignores_trailing_byte() {
        assert_eq!(decode_pcm16(&[0x00, 0x00, 0x01]).len(), 1);
    }

    #[test]
    fn wav_decodes_and_mixes_down() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(16384_i16).unwrap();
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let audio = EncodedAudio::new(cursor.into_inner(), AudioFormat::Wav);
        let clip = AudioClip::decode(&audio, Some(3)).unwrap();

        assert_eq!(clip.segment_index, Some(3));
        assert_eq!(clip.sample_rate, 16000);
        assert_eq!(clip.samples.len(), 100);
        assert!((clip.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn garbage_wav_is_an_error() {
        let audio = EncodedAudio::new(vec![1, 2, 3, 4], AudioFormat::Wav);
        assert!(AudioClip::decode(&audio, None).is_err());
    }

    #[test]
    fn clip_duration_follows_sample_rate() {
        let clip = AudioClip {
            segment_index: None,
            samples: vec![0.0; 12000],
            sample_rate: PCM_SAMPLE_RATE,
        };
        assert_eq!(clip.duration(), Duration::from_millis(500));
    }
}
