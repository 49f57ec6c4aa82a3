//! Local file source.

use super::{short_hash, MediaSource, SourceKind, SourceMedia};
use crate::error::{KlippError, Result};
use crate::media::probe_duration;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Video files on the local filesystem. Captions are picked up from a
/// sibling `.srt` or `.vtt` with the same stem.
#[derive(Debug, Default)]
pub struct LocalSource;

impl LocalSource {
    pub fn new() -> Self {
        Self
    }

    fn resolve(input: &str) -> Option<PathBuf> {
        let path = PathBuf::from(shellexpand::tilde(input.trim()).to_string());
        if path.is_file() {
            path.canonicalize().ok()
        } else {
            None
        }
    }

    /// Sibling caption file for `media`, if one exists.
    pub fn sibling_captions(media: &Path) -> Option<PathBuf> {
        ["srt", "vtt"]
            .iter()
            .map(|ext| media.with_extension(ext))
            .find(|p| p.is_file())
    }
}

#[async_trait]
impl MediaSource for LocalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn can_handle(&self, input: &str) -> bool {
        Self::resolve(input).is_some()
    }

    fn extract_id(&self, input: &str) -> Option<String> {
        Self::resolve(input).map(|p| p.display().to_string())
    }

    fn source_key(&self, id: &str) -> String {
        format!("local_{}", short_hash(id))
    }

    async fn acquire(&self, id: &str, _dest_dir: &Path) -> Result<SourceMedia> {
        let media_path = PathBuf::from(id);
        if !media_path.is_file() {
            return Err(KlippError::MediaNotFound(id.to_string()));
        }

        let duration = probe_duration(&media_path).await?;
        let title = media_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();

        Ok(SourceMedia {
            key: self.source_key(id),
            kind: SourceKind::Local,
            origin: id.to_string(),
            title,
            caption_path: Self::sibling_captions(&media_path),
            media_path,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_content_addressed_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talk.mp4");
        std::fs::write(&path, b"").unwrap();

        let source = LocalSource::new();
        let id = source.extract_id(path.to_str().unwrap()).unwrap();
        let key = source.source_key(&id);
        assert!(key.starts_with("local_"));
        assert_eq!(key.len(), "local_".len() + 16);
        assert_eq!(key, source.source_key(&id));
    }

    #[test]
    fn test_sibling_captions() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("talk.mp4");
        std::fs::write(&media, b"").unwrap();
        assert!(LocalSource::sibling_captions(&media).is_none());

        std::fs::write(dir.path().join("talk.vtt"), b"WEBVTT").unwrap();
        assert_eq!(
            LocalSource::sibling_captions(&media).unwrap(),
            dir.path().join("talk.vtt")
        );
    }

    #[test]
    fn test_rejects_directories_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSource::new();
        assert!(!source.can_handle(dir.path().to_str().unwrap()));
        assert!(!source.can_handle("/definitely/not/here.mp4"));
    }
}
