//! Platform sources fetched through yt-dlp.

use super::{MediaSource, SourceKind, SourceMedia};
use crate::config::DownloadSettings;
use crate::error::{KlippError, Result};
use crate::media::{download_video, fetch_metadata, probe_duration};
use crate::timing::Millis;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use tracing::info;

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| KlippError::Config(format!("invalid source pattern: {}", e)))
}

/// Shared acquisition: metadata, download, duration.
async fn acquire_remote(
    kind: SourceKind,
    key: String,
    url: String,
    dest_dir: &Path,
    settings: &DownloadSettings,
) -> Result<SourceMedia> {
    let metadata = fetch_metadata(&url, settings).await?;
    info!("Fetched metadata for '{}'", metadata.title);

    let downloaded = download_video(&url, &key, dest_dir, settings).await?;

    // The container is authoritative; platform metadata can be rounded.
    let duration = match probe_duration(&downloaded.media_path).await {
        Ok(d) => d,
        Err(e) => match metadata.duration_secs {
            Some(secs) => {
                tracing::warn!("ffprobe failed ({}), using platform duration", e);
                Millis::from_secs_f64(secs)
            }
            None => return Err(e),
        },
    };

    Ok(SourceMedia {
        key,
        kind,
        origin: url,
        title: metadata.title,
        media_path: downloaded.media_path,
        duration,
        caption_path: downloaded.caption_path,
    })
}

/// YouTube video source.
pub struct YoutubeSource {
    video_id_regex: Regex,
    settings: DownloadSettings,
}

impl YoutubeSource {
    pub fn new(settings: DownloadSettings) -> Result<Self> {
        // Matches various YouTube URL formats and bare video IDs
        let video_id_regex = compile(
            r"(?x)
            (?:
                (?:https?://)?
                (?:www\.|m\.)?
                (?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/|youtube\.com/live/)
                ([a-zA-Z0-9_-]{11})
            )
            |
            ^([a-zA-Z0-9_-]{11})$
        ",
        )?;

        Ok(Self {
            video_id_regex,
            settings,
        })
    }

    fn extract_video_id(&self, input: &str) -> Option<String> {
        let caps = self.video_id_regex.captures(input.trim())?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl MediaSource for YoutubeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::YouTube
    }

    fn can_handle(&self, input: &str) -> bool {
        self.extract_video_id(input).is_some()
    }

    fn extract_id(&self, input: &str) -> Option<String> {
        self.extract_video_id(input)
    }

    fn source_key(&self, id: &str) -> String {
        format!("yt_{}", id)
    }

    async fn acquire(&self, id: &str, dest_dir: &Path) -> Result<SourceMedia> {
        let url = format!("https://www.youtube.com/watch?v={}", id);
        acquire_remote(SourceKind::YouTube, self.source_key(id), url, dest_dir, &self.settings).await
    }
}

/// Bilibili video source, addressed by BV id.
pub struct BilibiliSource {
    bv_regex: Regex,
    settings: DownloadSettings,
}

impl BilibiliSource {
    pub fn new(settings: DownloadSettings) -> Result<Self> {
        let bv_regex = compile(r"(?:^|bilibili\.com/video/|/)(BV[0-9A-Za-z]{10})(?:$|[/?#])")?;
        Ok(Self { bv_regex, settings })
    }

    fn extract_bv(&self, input: &str) -> Option<String> {
        self.bv_regex
            .captures(input.trim())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl MediaSource for BilibiliSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Bilibili
    }

    fn can_handle(&self, input: &str) -> bool {
        self.extract_bv(input).is_some()
    }

    fn extract_id(&self, input: &str) -> Option<String> {
        self.extract_bv(input)
    }

    fn source_key(&self, id: &str) -> String {
        format!("bili_{}", id)
    }

    async fn acquire(&self, id: &str, dest_dir: &Path) -> Result<SourceMedia> {
        let url = format!("https://www.bilibili.com/video/{}", id);
        acquire_remote(SourceKind::Bilibili, self.source_key(id), url, dest_dir, &self.settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_youtube_id() {
        let source = YoutubeSource::new(DownloadSettings::default()).unwrap();

        for input in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "dQw4w9WgXcQ",
        ] {
            assert_eq!(source.extract_id(input), Some("dQw4w9WgXcQ".to_string()), "{input}");
        }

        assert_eq!(source.extract_id("not-a-video-id"), None);
        assert_eq!(source.extract_id(""), None);
    }

    #[test]
    fn test_extract_bilibili_id() {
        let source = BilibiliSource::new(DownloadSettings::default()).unwrap();

        assert_eq!(
            source.extract_id("https://www.bilibili.com/video/BV1GJ411x7h7/?spm_id_from=333"),
            Some("BV1GJ411x7h7".to_string())
        );
        assert_eq!(source.extract_id("BV1GJ411x7h7"), Some("BV1GJ411x7h7".to_string()));
        assert!(!source.can_handle("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
    }
}
