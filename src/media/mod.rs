//! Media extraction and download.
//!
//! The pipeline only touches media bytes through [`MediaExtractor`], so tests
//! can substitute a fake that writes placeholder files.

pub mod download;
mod ffmpeg;

pub use download::{download_video, fetch_metadata, DownloadedMedia, RemoteMetadata};
pub use ffmpeg::{
    apply_video_filter, extract_audio, extract_first_frame, extract_range, probe_duration, split_audio,
};

use crate::error::Result;
use crate::timing::Millis;
use async_trait::async_trait;
use std::path::Path;

/// Cuts time ranges out of media files.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Write `[start, end)` of `media` to `dest`, measured from the start of `media`.
    async fn extract(&self, media: &Path, start: Millis, end: Millis, dest: &Path) -> Result<()>;
}

/// [`MediaExtractor`] backed by ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegExtractor {
    reencode: bool,
}

impl FfmpegExtractor {
    pub fn new(reencode: bool) -> Self {
        Self { reencode }
    }
}

#[async_trait]
impl MediaExtractor for FfmpegExtractor {
    async fn extract(&self, media: &Path, start: Millis, end: Millis, dest: &Path) -> Result<()> {
        ffmpeg::extract_range(media, dest, start, end, self.reencode).await
    }
}
