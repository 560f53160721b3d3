//! Media boundary: turns a stored media reference into analysable text.
//!
//! Transcoding itself is out of scope. `TranscriptDir` serves transcripts
//! that were extracted ahead of time, one text file per media reference.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// Speaking rate used to estimate duration from a transcript.
const WORDS_PER_MINUTE: u64 = 150;

/// Extracted content of one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaContent {
    pub text: String,
    pub duration: Duration,
}

impl MediaContent {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let words = text.split_whitespace().count() as u64;
        Self {
            duration: Duration::from_secs(words * 60 / WORDS_PER_MINUTE),
            text,
        }
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fetch extracted content. A missing source must be reported as
    /// [`Error::SourceUnavailable`] so callers can degrade instead of retrying.
    async fn fetch(&self, media_ref: &str) -> Result<MediaContent>;
}

/// Reads `<root>/<media_ref>` (or `<root>/<media_ref>.txt`) as a transcript.
#[derive(Debug, Clone)]
pub struct TranscriptDir {
    root: PathBuf,
}

impl TranscriptDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, media_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(media_ref);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::SourceUnavailable(format!(
                "media reference escapes transcript root: {media_ref}"
            )));
        }
        let direct = self.root.join(relative);
        if direct.is_file() {
            return Ok(direct);
        }
        Ok(self.root.join(format!("{media_ref}.txt")))
    }
}

#[async_trait]
impl MediaSource for TranscriptDir {
    async fn fetch(&self, media_ref: &str) -> Result<MediaContent> {
        let path = self.resolve(media_ref)?;
        debug!(path = %path.display(), "reading transcript");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Err(Error::SourceUnavailable(format!(
                "transcript is empty: {}",
                path.display()
            ))),
            Ok(text) => Ok(MediaContent::from_text(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::SourceUnavailable(
                format!("no transcript at {}", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_transcript_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let media = TranscriptDir::new(dir.path());
        assert!(matches!(
            media.fetch("session-42").await,
            Err(Error::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn reads_transcript_with_implicit_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session-1.txt"), "word ".repeat(300)).unwrap();
        let media = TranscriptDir::new(dir.path());
        let content = media.fetch("session-1").await.unwrap();
        assert_eq!(content.duration, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let media = TranscriptDir::new(dir.path());
        assert!(media.fetch("../etc/passwd").await.is_err());
    }
}
