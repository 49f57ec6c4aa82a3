//! Speech-to-text.
//!
//! Invoked by the captioning stage only when the source has no usable
//! captions, or when transcription is forced.

mod whisper;

pub use whisper::WhisperTranscriber;

use crate::captions::CaptionTrack;
use crate::error::Result;
use crate::timing::Millis;
use async_trait::async_trait;
use std::path::Path;

/// Trait for transcription services.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `[start, end)` of `media`. Cue times are measured from the
    /// start of `media`, not from `start`.
    async fn transcribe(&self, media: &Path, start: Millis, end: Millis) -> Result<CaptionTrack>;
}
