use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use parley::config::{ResponderProvider, SpeechProvider};
use parley::session::SessionEvent;
use parley::voice::{
    AudioCuePlayer, AudioOutput, CommandSpeech, CpalOutput, Cue, LocalSpeech, TextToSpeech,
};
use parley::{
    ChannelCapture, ChatResponder, Config, Endpointer, GeminiResponder, Responder, SessionHandle,
    SessionState, Speaker, SpeechSynthesisPipeline, VoiceSessionController, segment,
};

/// How long to wait for the loop to open a listening session
const LISTEN_WAIT: Duration = Duration::from_secs(5);

/// Parley - hands-free conversational voice loop
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/parley/config.toml)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Converse by typing; each line is one utterance
    ///
    /// `/toggle` switches the loop, `/stop` cuts off a reply, `/quit` exits.
    Chat,
    /// Show how a reply would be split for speech
    Segment {
        /// Reply text
        text: String,
    },
    /// Speak text through the configured speech output
    Say {
        /// Text to speak
        #[arg(default_value = "Xin chào! Đây là bài kiểm tra giọng nói.")]
        text: String,
    },
    /// Play the listening and processing cues
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Chat => chat(load_config(cli.config.as_deref())?).await,
        Command::Segment { text } => {
            print_segments(&text);
            Ok(())
        }
        Command::Say { text } => say(&load_config(cli.config.as_deref())?, &text).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

fn load_config(path: Option<&Path>) -> parley::Result<Config> {
    path.map_or_else(Config::load, Config::load_from)
}

fn print_segments(text: &str) {
    for segment in segment(text) {
        println!("{}: {}", segment.index, segment.text);
    }
}

/// Build the speech output for the configured provider
fn build_speaker(config: &Config) -> anyhow::Result<Speaker> {
    let speech = &config.speech;
    let key = config
        .api_keys
        .for_speech(speech.provider)
        .unwrap_or_default()
        .to_string();
    let tts = match speech.provider {
        SpeechProvider::Native => {
            tracing::info!("speaking through local synthesizer");
            let local: Arc<dyn LocalSpeech> = Arc::new(
                speech
                    .native_command
                    .as_ref()
                    .map_or_else(CommandSpeech::default, CommandSpeech::new),
            );
            return Ok(Speaker::local(local, speech.native.clone()));
        }
        SpeechProvider::OpenAI => {
            TextToSpeech::new_openai(key, speech.model.clone(), speech.speed)?
        }
        SpeechProvider::ElevenLabs => TextToSpeech::new_elevenlabs(key, speech.model.clone())?,
        SpeechProvider::Gemini => TextToSpeech::new_gemini(key, speech.model.clone())?,
    };

    tracing::info!(
        provider = ?speech.provider,
        voice = %speech.voice,
        lookahead = speech.lookahead,
        "speaking through streaming synthesis"
    );

    let output: Arc<dyn AudioOutput> = Arc::new(CpalOutput::new()?);
    let pipeline = SpeechSynthesisPipeline::new(
        Arc::new(tts),
        output,
        speech.voice.clone(),
        speech.lookahead,
    )
    .with_fetch_timeout(speech.fetch_timeout);
    Ok(Speaker::streaming(pipeline))
}

/// Build the reply generator for the configured provider
fn build_responder(config: &Config) -> anyhow::Result<Arc<dyn Responder>> {
    let provider = config.responder.provider;
    let key = config
        .api_keys
        .for_responder(provider)
        .ok_or_else(|| anyhow::anyhow!("{provider:?} responder requires an API key"))?
        .to_string();
    let model = config.responder.model.clone();
    let base_url = config.responder.base_url.clone();

    tracing::info!(?provider, %model, "responder configured");

    Ok(match provider {
        ResponderProvider::OpenAI => {
            Arc::new(ChatResponder::new(key, model, base_url)?)
        }
        ResponderProvider::Gemini => {
            Arc::new(GeminiResponder::new(key, model, base_url)?)
        }
    })
}

fn build_cues() -> AudioCuePlayer {
    match CpalOutput::new() {
        Ok(output) => AudioCuePlayer::new(Arc::new(output)),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output, cues disabled");
            AudioCuePlayer::silent()
        }
    }
}

/// Typed conversation through the full voice loop
async fn chat(config: Config) -> anyhow::Result<()> {
    let capture = ChannelCapture::new();
    let endpointer = Endpointer::new(
        Some(Arc::new(capture.clone())),
        build_cues(),
        config.endpoint.clone(),
    );
    let speaker = Arc::new(build_speaker(&config)?);
    let responder = build_responder(&config)?;
    let profile = (!config.profile.is_empty()).then(|| config.profile.clone());

    let (controller, handle) = VoiceSessionController::new(
        endpointer,
        speaker,
        responder,
        config.session.clone(),
        profile,
    )?;
    let controller = controller.spawn();
    tokio::spawn(print_events(handle.clone()));

    println!("Type to talk. /toggle switches the loop, /stop interrupts, /quit exits.\n");
    handle.toggle().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => {}
            "/quit" => break,
            "/toggle" => {
                let active = handle.toggle().await?;
                println!("[loop {}]", if active { "on" } else { "off" });
            }
            "/stop" => handle.interrupt().await?,
            text => utter(&handle, &capture, text).await?,
        }
    }

    handle.shutdown().await;
    let _ = controller.await;
    Ok(())
}

/// Deliver one typed utterance, interrupting a reply if needed
async fn utter(
    handle: &SessionHandle,
    capture: &ChannelCapture,
    text: &str,
) -> anyhow::Result<()> {
    if !capture.is_open() {
        match handle.state() {
            SessionState::Processing | SessionState::Speaking => handle.interrupt().await?,
            // Off, or between turns: switching on (again) listens right away
            SessionState::Idle => {
                if !handle.toggle().await? {
                    handle.toggle().await?;
                }
            }
            SessionState::Listening => {}
        }

        let deadline = tokio::time::Instant::now() + LISTEN_WAIT;
        while !capture.is_open() {
            if tokio::time::timeout_at(deadline, capture.session_opened())
                .await
                .is_err()
            {
                anyhow::bail!("voice loop is not listening");
            }
        }
    }

    capture.partial(text).await;
    capture.finalize(text).await;
    Ok(())
}

async fn print_events(handle: SessionHandle) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(SessionEvent::UserUtterance(text)) => println!("you: {text}"),
            Ok(SessionEvent::Reply(text)) => println!("parley: {text}"),
            Ok(SessionEvent::Command(command)) => println!("[command] {command:?}"),
            Ok(SessionEvent::Error(error)) => println!("[error] {error}"),
            Ok(SessionEvent::LoopToggled(active)) => {
                tracing::debug!(active, "loop toggled");
            }
            Ok(SessionEvent::StateChanged(_) | SessionEvent::Transcript(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event printer lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Speak text through the configured output and wait for it to finish
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Speaking: \"{text}\"\n");

    let speaker = build_speaker(config)?;
    let (tx, rx) = tokio::sync::oneshot::channel();
    speaker.speak(text, move || {
        let _ = tx.send(());
    });

    rx.await
        .map_err(|_| anyhow::anyhow!("speech was cancelled"))?;
    println!("Done.");
    Ok(())
}

/// Play the listening and processing cues
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a low beep, then a high beep\n");

    let output = CpalOutput::new()?;
    for cue in [Cue::Listening, Cue::Processing] {
        println!("{cue:?}: {} Hz for {:?}", cue.frequency(), cue.duration());
        output.play(cue.render()).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    println!("\n---");
    println!("If you heard both beeps, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
