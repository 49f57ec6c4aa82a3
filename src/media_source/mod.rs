//! Media source abstraction for Klipp.
//!
//! Resolves user input (a URL, a video ID or a local path) to a source with a
//! stable key, and acquires the media plus any platform captions.

mod local;
mod remote;

pub use local::LocalSource;
pub use remote::{BilibiliSource, YoutubeSource};

use crate::config::DownloadSettings;
use crate::error::{KlippError, Result};
use crate::timing::Millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Type of media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    YouTube,
    Bilibili,
    Local,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::YouTube => write!(f, "youtube"),
            SourceKind::Bilibili => write!(f, "bilibili"),
            SourceKind::Local => write!(f, "local"),
        }
    }
}

/// Downloaded (or located) source media. Immutable once acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMedia {
    /// Stable key derived from the origin.
    pub key: String,
    pub kind: SourceKind,
    /// URL or canonical path the media came from.
    pub origin: String,
    pub title: String,
    pub media_path: PathBuf,
    pub duration: Millis,
    /// Platform caption file, if the source had one.
    pub caption_path: Option<PathBuf>,
}

/// A source that can acquire media for an input.
#[async_trait]
pub trait MediaSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Check if this source can handle the given input.
    fn can_handle(&self, input: &str) -> bool;

    /// Extract the source-specific ID from the input.
    fn extract_id(&self, input: &str) -> Option<String>;

    /// Stable key for an ID; names the run directory.
    fn source_key(&self, id: &str) -> String;

    /// Fetch media and platform captions into `dest_dir`.
    async fn acquire(&self, id: &str, dest_dir: &Path) -> Result<SourceMedia>;
}

/// Detect the appropriate source for the given input.
pub fn detect_source(input: &str, settings: &DownloadSettings) -> Result<Box<dyn MediaSource>> {
    let local = LocalSource::new();
    if local.can_handle(input) {
        return Ok(Box::new(local));
    }

    let bilibili = BilibiliSource::new(settings.clone())?;
    if bilibili.can_handle(input) {
        return Ok(Box::new(bilibili));
    }

    let youtube = YoutubeSource::new(settings.clone())?;
    if youtube.can_handle(input) {
        return Ok(Box::new(youtube));
    }

    Err(KlippError::InvalidInput(format!(
        "Could not recognise '{}' as a YouTube/Bilibili video or an existing file",
        input
    )))
}

/// Resolve input to its source and ID.
pub fn parse_input(input: &str, settings: &DownloadSettings) -> Result<(Box<dyn MediaSource>, String)> {
    let source = detect_source(input, settings)?;
    let id = source
        .extract_id(input)
        .ok_or_else(|| KlippError::InvalidInput(format!("Could not extract an ID from '{}'", input)))?;
    Ok((source, id))
}

/// First 16 hex characters of the SHA-256 of `value`.
pub(crate) fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_sources() {
        let settings = DownloadSettings::default();

        let (source, id) = parse_input("https://www.youtube.com/watch?v=dQw4w9WgXcQ", &settings).unwrap();
        assert_eq!(source.kind(), SourceKind::YouTube);
        assert_eq!(source.source_key(&id), "yt_dQw4w9WgXcQ");

        let (source, id) = parse_input("https://www.bilibili.com/video/BV1GJ411x7h7?p=1", &settings).unwrap();
        assert_eq!(source.kind(), SourceKind::Bilibili);
        assert_eq!(source.source_key(&id), "bili_BV1GJ411x7h7");

        assert!(parse_input("not a thing at all", &settings).is_err());
    }

    #[test]
    fn test_local_file_wins_over_id_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dQw4w9WgXcQ");
        std::fs::write(&path, b"").unwrap();

        let source = detect_source(path.to_str().unwrap(), &DownloadSettings::default()).unwrap();
        assert_eq!(source.kind(), SourceKind::Local);
    }

    #[test]
    fn test_short_hash_is_stable() {
        assert_eq!(short_hash("abc"), "ba7816bf8f01cfea");
        assert_eq!(short_hash("abc").len(), 16);
    }
}
