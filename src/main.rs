use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use duet_voice::voice::{
    AudioCapture, AudioPlayback, PLAYBACK_SAMPLE_RATE, SegmenterEvent, VoiceActivitySegmenter,
    build_classifier, calculate_energy, sine_tone,
};
use duet_voice::{Config, Daemon};

/// Duet - interruptible voice agent paired with a computer-operating agent
#[derive(Parser)]
#[command(name = "duet", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Address the peer link listens on
    #[arg(long, env = "DUET_PEER_ADDR")]
    peer_addr: Option<String>,

    /// Skip the spoken greeting at startup
    #[arg(long)]
    no_greeting: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the voice agent (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Print speech segments detected on the microphone
    TestVad {
        /// Duration in seconds
        #[arg(short, long, default_value = "15")]
        duration: u64,
    },
    /// Print the effective configuration
    PrintConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,duet_voice=info",
        1 => "info,duet_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(addr) = cli.peer_addr {
        config.peer.listen_addr = addr;
    }
    if cli.no_greeting {
        config.dispatch.greeting = None;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let daemon = Daemon::new(config)?;
            daemon.run().await?;
            Ok(())
        }
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestVad { duration } => test_vad(&config, duration).await,
        Command::PrintConfig => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::channel(256);
    let mut capture = AudioCapture::new(config.voice.sample_rate, config.voice.chunk_samples())?;
    capture.start(tx)?;

    println!("Sample rate: {} Hz", config.voice.sample_rate);
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            samples.extend_from_slice(chunk.samples());
        }

        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new(PLAYBACK_SAMPLE_RATE)?;
    let samples = sine_tone(440.0, Duration::from_secs(2), PLAYBACK_SAMPLE_RATE, 0.3);
    println!("Playing {} samples at {} Hz...", samples.len(), PLAYBACK_SAMPLE_RATE);

    tokio::task::spawn_blocking(move || playback.play_blocking(samples, &AtomicBool::new(false)))
        .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Run the segmenter on live input and print its events
#[allow(clippy::future_not_send)]
async fn test_vad(config: &Config, duration: u64) -> anyhow::Result<()> {
    let voice = &config.voice;
    println!(
        "Listening for {duration} seconds ({:?} VAD, threshold {:.2}, silence {} ms)...\n",
        voice.vad_backend, voice.vad_threshold, voice.silence_ms
    );

    let (chunk_tx, chunk_rx) = mpsc::channel(256);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let segmenter = VoiceActivitySegmenter::new(build_classifier(voice), voice, event_tx);
    let task = tokio::spawn(segmenter.run(chunk_rx, cancel.clone()));

    let mut capture = AudioCapture::new(voice.sample_rate, voice.chunk_samples())?;
    capture.start(chunk_tx)?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, event_rx.recv()).await {
        match event {
            SegmenterEvent::SpeechStart { turn } => println!("[turn {turn}] speech started"),
            SegmenterEvent::SpeechEnd { segment } => println!(
                "[turn {}] speech ended: {:.2}s ({} lookback chunks)",
                segment.turn(),
                segment.duration_secs(voice.sample_rate),
                segment.lookback_len()
            ),
        }
    }

    capture.stop();
    cancel.cancel();
    let stats = task.await?;
    println!("\n{stats:?}");

    Ok(())
}
