//! The dictation loop
//!
//! One cycle per utterance: capture, recognize, decide, act, wait. The
//! decision is a pure function over the iteration outcome so the loop's
//! control flow is testable without a microphone or network. Only the stop
//! phrase leaves the loop; both modeled recognition errors print a diagnostic
//! and cycle again. Capture and transcript failures are fatal and propagate.

use crate::audio::UtteranceSource;
use crate::recognition::{RecognitionError, Recognizer};
use crate::transcript::TranscriptSink;
use anyhow::Result;
use jiff::Zoned;
use std::path::PathBuf;
use std::time::Duration;

/// Spoken phrase that ends the session (matched case-insensitively, as a
/// substring of the transcription)
pub const STOP_PHRASE: &str = "close this conversation";

/// Default transcript path, relative to the working directory
pub const OUTPUT_PATH: &str = "transcription.md";

pub struct SessionConfig {
    pub stop_phrase: String,
    pub poll_delay: Duration,
    /// Directory to retain per-utterance WAV files in, if any
    pub keep_audio: Option<PathBuf>,
}

/// What one iteration produced
pub enum Outcome {
    Recognized(String),
    ServiceUnavailable(String),
    Unintelligible,
}

/// What the loop does with an outcome
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Terminal, reached only via the stop phrase
    Stop,
    /// Append to the transcript and confirm
    Record(String),
    /// Print the diagnostic and cycle again
    Note(String),
}

pub fn contains_stop_phrase(text: &str, stop_phrase: &str) -> bool {
    text.to_lowercase().contains(&stop_phrase.to_lowercase())
}

/// Pure decision over one iteration's outcome
pub fn classify(outcome: Outcome, stop_phrase: &str) -> Step {
    match outcome {
        Outcome::Recognized(text) if contains_stop_phrase(&text, stop_phrase) => Step::Stop,
        Outcome::Recognized(text) => Step::Record(text),
        Outcome::ServiceUnavailable(detail) => Step::Note(format!(
            "Could not request results from speech recognition service: {}",
            detail
        )),
        Outcome::Unintelligible => Step::Note("Could not understand audio".to_string()),
    }
}

/// Run the loop until the stop phrase is spoken.
///
/// Unbounded by design: no retry budget, no backoff, no iteration cap. The
/// fixed poll delay bounds CPU usage when the service fails in a tight loop.
pub async fn run<S, R, T>(
    source: &mut S,
    recognizer: &R,
    sink: &mut T,
    config: &SessionConfig,
) -> Result<()>
where
    S: UtteranceSource,
    R: Recognizer + Sync,
    T: TranscriptSink,
{
    loop {
        let utterance = source.next_utterance()?;

        if let Some(dir) = &config.keep_audio {
            let timestamp = Zoned::now().strftime("%Y-%m-%d_%H-%M-%S");
            utterance.write_wav(dir.join(format!("{}.wav", timestamp)))?;
        }

        let outcome = match recognizer.recognize(&utterance).await {
            Ok(text) => Outcome::Recognized(text),
            Err(RecognitionError::ApiUnavailable(detail)) => Outcome::ServiceUnavailable(detail),
            Err(RecognitionError::Unintelligible) => Outcome::Unintelligible,
        };

        match classify(outcome, &config.stop_phrase) {
            Step::Stop => {
                println!("Stop phrase detected. Ending conversation.");
                break;
            }
            Step::Record(text) => {
                sink.append(&text)?;
                println!("Recognized: {}", text);
            }
            Step::Note(diagnostic) => {
                eprintln!("{}", diagnostic);
            }
        }

        tokio::time::sleep(config.poll_delay).await;
    }

    Ok(())
}
