//! Endpointing and speech output, end to end with fake devices

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeSynth, RecordingOutput, RecordingSpeech, WAIT};
use parley::voice::{
    AudioCuePlayer, AudioOutput, ChannelCapture, EndpointConfig, Endpointer, FinalizedBy,
    LocalSpeech, SessionOutcome, Speaker, SpeechSynthesisPipeline, SpeechSynthesizer,
    VoiceParams, segment,
};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};

const CLIP: Duration = Duration::from_millis(100);

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn pipeline(synth: &Arc<FakeSynth>, output: &Arc<RecordingOutput>) -> SpeechSynthesisPipeline {
    SpeechSynthesisPipeline::new(
        Arc::clone(synth) as Arc<dyn SpeechSynthesizer>,
        Arc::clone(output) as Arc<dyn AudioOutput>,
        "alloy",
        2,
    )
}

/// Completion callback that counts calls and signals the first one
fn completion() -> (
    Arc<AtomicUsize>,
    oneshot::Receiver<()>,
    impl FnOnce() + Send + 'static,
) {
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    let counter = Arc::clone(&count);
    let callback = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(());
    };
    (count, rx, callback)
}

fn endpointer(capture: &ChannelCapture, cues: AudioCuePlayer) -> Endpointer {
    Endpointer::new(
        Some(Arc::new(capture.clone())),
        cues,
        EndpointConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_playback_follows_segment_order_not_fetch_order() {
    let synth = Arc::new(
        FakeSynth::new(CLIP)
            .delay("Một.", ms(300))
            .delay("Hai.", ms(10))
            .delay("Ba.", ms(200))
            .delay("Bốn.", ms(5)),
    );
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (count, done, on_complete) = completion();

    pipeline.play(segment("Một. Hai. Ba. Bốn."), on_complete);

    timeout(WAIT, done).await.unwrap().unwrap();
    assert_eq!(output.played(), vec![0, 1, 2, 3]);
    assert_eq!(output.finished(), 4);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!pipeline.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_failed_segment_is_skipped() {
    let synth = Arc::new(FakeSynth::new(CLIP).fail("Hai."));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (count, done, on_complete) = completion();

    pipeline.play(segment("Một. Hai. Ba."), on_complete);

    timeout(WAIT, done).await.unwrap().unwrap();
    sleep(ms(500)).await;
    assert_eq!(output.played(), vec![0, 2]);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_segment_is_skipped_after_timeout() {
    let synth = Arc::new(FakeSynth::new(CLIP).delay("Hai.", Duration::from_secs(365 * 86_400)));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output).with_fetch_timeout(ms(2000));
    let (count, done, on_complete) = completion();
    let started = Instant::now();

    pipeline.play(segment("Một. Hai. Ba."), on_complete);

    timeout(WAIT, done).await.unwrap().unwrap();
    assert!(started.elapsed() >= ms(2000));
    sleep(ms(500)).await;
    assert_eq!(output.played(), vec![0, 2]);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!pipeline.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_run_with_no_audio_still_completes() {
    let synth = Arc::new(FakeSynth::new(CLIP).fail("Một.").empty("Hai."));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (count, done, on_complete) = completion();

    pipeline.play(segment("Một. Hai."), on_complete);

    timeout(WAIT, done).await.unwrap().unwrap();
    assert!(output.played().is_empty());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_reply_completes_immediately() {
    let synth = Arc::new(FakeSynth::new(CLIP));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (count, done, on_complete) = completion();

    pipeline.play(segment("   "), on_complete);

    timeout(WAIT, done).await.unwrap().unwrap();
    assert!(synth.calls().is_empty());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent_and_suppresses_completion() {
    let synth = Arc::new(FakeSynth::new(Duration::from_secs(1)));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (count, _done, on_complete) = completion();

    let handle = pipeline.play(segment("Một. Hai. Ba."), on_complete);
    sleep(ms(50)).await;
    assert!(handle.is_active());

    handle.cancel();
    handle.cancel();
    pipeline.cancel();

    sleep(Duration::from_secs(10)).await;
    assert!(handle.is_cancelled());
    assert!(!pipeline.is_active());
    assert_eq!(output.stops(), 1);
    assert_eq!(output.played(), vec![0]);
    assert_eq!(output.finished(), 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_segment_plays_nothing() {
    let synth = Arc::new(FakeSynth::new(CLIP).delay("Một.", ms(200)));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (count, _done, on_complete) = completion();

    let handle = pipeline.play(segment("Một. Hai."), on_complete);
    handle.cancel();

    sleep(Duration::from_secs(5)).await;
    assert!(output.played().is_empty());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_run_cancels_previous() {
    let synth = Arc::new(FakeSynth::new(Duration::from_secs(1)));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (first_count, _first_done, first) = completion();
    let (second_count, second_done, second) = completion();

    let first_run = pipeline.play(segment("Một. Hai."), first);
    sleep(ms(50)).await;
    let second_run = pipeline.play(segment("Ba."), second);

    timeout(WAIT, second_done).await.unwrap().unwrap();
    assert!(first_run.is_cancelled());
    assert!(!second_run.is_cancelled());
    assert_ne!(first_run.id(), second_run.id());
    assert_eq!(first_count.load(Ordering::SeqCst), 0);
    assert_eq!(second_count.load(Ordering::SeqCst), 1);
    assert_eq!(output.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lookahead_prefetches_while_playing() {
    let synth = Arc::new(FakeSynth::new(Duration::from_secs(1)));
    let output = Arc::new(RecordingOutput::new());
    let pipeline = pipeline(&synth, &output);
    let (_count, done, on_complete) = completion();

    pipeline.play(segment("Một. Hai. Ba. Bốn. Năm."), on_complete);

    // Segment 0 playing: it and the next two are fetched
    sleep(ms(100)).await;
    assert_eq!(output.played(), vec![0]);
    assert_eq!(synth.calls(), vec!["Một.", "Hai.", "Ba."]);

    // Segment 1 playing: one more
    sleep(Duration::from_secs(1)).await;
    assert_eq!(output.played(), vec![0, 1]);
    assert_eq!(synth.calls().len(), 4);

    timeout(WAIT, done).await.unwrap().unwrap();
    assert_eq!(output.played(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_speaker_streams_reply_sentence_by_sentence() {
    let synth = Arc::new(FakeSynth::new(CLIP));
    let output = Arc::new(RecordingOutput::new());
    let speaker = Speaker::streaming(pipeline(&synth, &output));
    assert!(speaker.is_streaming());
    let (_count, done, on_complete) = completion();

    speaker.speak("Chào bạn! Hôm nay là thứ Hai.", on_complete);
    assert!(speaker.is_speaking());

    timeout(WAIT, done).await.unwrap().unwrap();
    assert_eq!(synth.calls(), vec!["Chào bạn!", "Hôm nay là thứ Hai."]);
    assert_eq!(output.played(), vec![0, 1]);
    assert!(!speaker.is_speaking());
}

#[tokio::test(start_paused = true)]
async fn test_local_speaker_cancel_stops_speech() {
    let local = Arc::new(RecordingSpeech::new(Duration::from_secs(2)));
    let speaker = Speaker::local(
        Arc::clone(&local) as Arc<dyn LocalSpeech>,
        VoiceParams::default(),
    );
    assert!(!speaker.is_streaming());
    let (count, _done, on_complete) = completion();

    speaker.speak("Xin chào.", on_complete);
    sleep(ms(100)).await;
    speaker.cancel();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(local.spoken(), vec!["Xin chào."]);
    assert_eq!(local.finished(), 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silence_finalizes_latest_partial() {
    let capture = ChannelCapture::new();
    let cues = Arc::new(RecordingOutput::new());
    let mut endpointer = endpointer(
        &capture,
        AudioCuePlayer::new(Arc::clone(&cues) as Arc<dyn AudioOutput>),
    );
    endpointer.start().await.unwrap();

    let started = Instant::now();
    let feeder = capture.clone();
    tokio::spawn(async move {
        feeder.partial("xin").await;
        sleep(ms(120)).await;
        feeder.partial("xin chào").await;
    });

    let outcome = endpointer.next_outcome().await;
    let elapsed = started.elapsed();

    let SessionOutcome::Finalized(utterance) = outcome else {
        panic!("expected an utterance, got {outcome:?}");
    };
    assert_eq!(utterance.text, "xin chào");
    assert_eq!(utterance.finalized_by, FinalizedBy::SilenceTimeout);
    assert!(elapsed >= ms(720), "finalized after {elapsed:?}");
    assert!(elapsed < ms(780), "finalized after {elapsed:?}");

    assert!(!capture.is_open());
    assert_eq!(endpointer.next_outcome().await, SessionOutcome::Stopped);

    // Listening cue on session start, processing cue on finalize
    sleep(ms(10)).await;
    assert_eq!(cues.clip_lengths().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_steady_partials_keep_session_open() {
    let capture = ChannelCapture::new();
    let mut endpointer = endpointer(&capture, AudioCuePlayer::silent());
    endpointer.start().await.unwrap();

    let started = Instant::now();
    let feeder = capture.clone();
    tokio::spawn(async move {
        for word in ["một", "một hai", "một hai ba", "một hai ba bốn", "một hai ba bốn năm"] {
            feeder.partial(word).await;
            sleep(ms(500)).await;
        }
    });

    let outcome = endpointer.next_outcome().await;
    let elapsed = started.elapsed();

    let SessionOutcome::Finalized(utterance) = outcome else {
        panic!("expected an utterance, got {outcome:?}");
    };
    assert_eq!(utterance.text, "một hai ba bốn năm");
    assert!(elapsed >= ms(2600), "finalized after {elapsed:?}");
    assert!(elapsed < ms(2700), "finalized after {elapsed:?}");
    assert_eq!(endpointer.partials(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_final_result_wins_over_later_partials() {
    let capture = ChannelCapture::new();
    let mut endpointer = endpointer(&capture, AudioCuePlayer::silent());
    endpointer.start().await.unwrap();

    assert!(capture.partial("mấy giờ").await);
    assert!(capture.finalize("mấy giờ rồi").await);
    assert!(capture.partial("rồi nhỉ").await);

    let outcome = endpointer.next_outcome().await;
    let SessionOutcome::Finalized(utterance) = outcome else {
        panic!("expected an utterance, got {outcome:?}");
    };
    assert_eq!(utterance.text, "mấy giờ rồi");
    assert_eq!(utterance.finalized_by, FinalizedBy::ExplicitFinal);

    // Nothing more from this session
    sleep(Duration::from_secs(2)).await;
    assert_eq!(endpointer.next_outcome().await, SessionOutcome::Stopped);
    assert!(!capture.partial("late").await);
}

#[tokio::test(start_paused = true)]
async fn test_blank_partial_disarms_silence_timer() {
    let capture = ChannelCapture::new();
    let mut endpointer = endpointer(&capture, AudioCuePlayer::silent());
    endpointer.start().await.unwrap();

    let started = Instant::now();
    let feeder = capture.clone();
    tokio::spawn(async move {
        feeder.partial("xin").await;
        sleep(ms(100)).await;
        feeder.partial("   ").await;
        sleep(Duration::from_secs(2)).await;
        feeder.end().await;
    });

    assert_eq!(endpointer.next_outcome().await, SessionOutcome::NoInput);
    assert!(started.elapsed() >= ms(2100));
}
