mod audio;
mod recognition;
mod session;
mod transcript;

use crate::audio::{CaptureSettings, Microphone};
use crate::recognition::{DEFAULT_API_KEY, GoogleRecognizer};
use crate::session::{OUTPUT_PATH, STOP_PHRASE, SessionConfig};
use crate::transcript::MarkdownTranscript;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "voicelog")]
#[command(about = "Hands-free voice note logger for the command line")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for speech and append each transcription to a Markdown file
    Listen(ListenArgs),

    /// List available audio recording devices
    Devices,
}

#[derive(Args)]
struct ListenArgs {
    /// Transcript file to append to
    #[arg(long, default_value = OUTPUT_PATH)]
    output: PathBuf,

    /// Spoken phrase that ends the session (case-insensitive substring)
    #[arg(long, default_value = STOP_PHRASE)]
    stop_phrase: String,

    /// Ambient noise calibration window in seconds
    #[arg(long, default_value = "5")]
    calibration: u64,

    /// Delay between listen cycles in milliseconds
    #[arg(long, default_value = "500")]
    poll_delay_ms: u64,

    /// Maximum utterance duration in seconds
    #[arg(long, default_value = "30")]
    max_duration: u64,

    /// Silence duration that ends an utterance in seconds
    #[arg(long, default_value = "2")]
    silence_duration: u64,

    /// Recognition language tag
    #[arg(long, default_value = "en-US")]
    language: String,

    /// Speech API key
    #[arg(long, default_value = DEFAULT_API_KEY)]
    api_key: String,

    /// Retain each utterance as a WAV file in this directory
    #[arg(long)]
    keep_audio: Option<PathBuf>,
}

async fn listen(args: ListenArgs) -> anyhow::Result<()> {
    if let Some(dir) = &args.keep_audio {
        std::fs::create_dir_all(dir)?;
    }

    let mut microphone = Microphone::new(CaptureSettings {
        calibration: Duration::from_secs(args.calibration),
        silence_hold: Duration::from_secs(args.silence_duration),
        max_utterance: Duration::from_secs(args.max_duration),
    })?;

    let recognizer = GoogleRecognizer::new(&args.language, &args.api_key)?;
    let mut transcript = MarkdownTranscript::new(&args.output);

    let config = SessionConfig {
        stop_phrase: args.stop_phrase,
        poll_delay: Duration::from_millis(args.poll_delay_ms),
        keep_audio: args.keep_audio,
    };

    println!("Speak now... Say '{}' to stop.", config.stop_phrase);

    session::run(&mut microphone, &recognizer, &mut transcript, &config).await?;

    println!(
        "Transcription complete. Check {} for results.",
        transcript.path().display()
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Listen(args) => {
            if let Err(e) = listen(args).await {
                eprintln!("Session failed: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Devices => {
            match Microphone::list_devices() {
                Ok(devices) => {
                    println!("Available Audio Devices:");
                    println!(
                        "{:<30} {:<10} {:<20} Formats",
                        "Name", "Default", "Sample Rates"
                    );
                    println!("{}", "-".repeat(80));

                    for device in devices {
                        let default_str = if device.is_default { "YES" } else { "NO" };
                        let sample_rates = device
                            .supported_sample_rates
                            .iter()
                            .take(3)
                            .map(|sr| sr.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");

                        let formats = device
                            .supported_formats
                            .iter()
                            .take(2)
                            .map(|f| format!("{:?}", f))
                            .collect::<Vec<_>>()
                            .join(", ");

                        println!(
                            "{:<30} {:<10} {:<20} {}",
                            &device.name[..device.name.len().min(30)],
                            default_str,
                            sample_rates,
                            formats
                        );
                    }
                }
                Err(e) => {
                    eprintln!("Failed to list audio devices: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
