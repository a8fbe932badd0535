//! Append-only Markdown transcript log

use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination for accepted transcriptions, substitutable in tests
pub trait TranscriptSink {
    fn append(&mut self, text: &str) -> Result<()>;
}

/// One bullet line per utterance, opened and closed around every append so the
/// file is durable after each accepted line
pub struct MarkdownTranscript {
    path: PathBuf,
}

impl MarkdownTranscript {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TranscriptSink for MarkdownTranscript {
    fn append(&mut self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "- {}", text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_creates_file_with_bullet_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcription.md");

        let mut transcript = MarkdownTranscript::new(&path);
        transcript.append("hello world").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "- hello world\n");
    }

    #[test]
    fn test_appends_are_ordered_and_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcription.md");

        let mut transcript = MarkdownTranscript::new(&path);
        transcript.append("first note").unwrap();
        transcript.append("second note").unwrap();
        transcript.append("third note").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["- first note", "- second note", "- third note"]);
    }

    #[test]
    fn test_append_preserves_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcription.md");
        std::fs::write(&path, "- from a previous session\n").unwrap();

        let mut transcript = MarkdownTranscript::new(&path);
        transcript.append("new note").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "- from a previous session\n- new note\n");
    }

    #[test]
    fn test_empty_text_still_logged() {
        // Whitespace-only transcriptions go in as-is
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcription.md");

        let mut transcript = MarkdownTranscript::new(&path);
        transcript.append("").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "- \n");
    }

    #[test]
    fn test_append_to_unwritable_path_fails() {
        let mut transcript = MarkdownTranscript::new("/nonexistent-dir/transcription.md");
        assert!(transcript.append("anything").is_err());
    }
}
