//! Klipp - highlight clips from long-form video
//!
//! Klipp cuts a bounded set of the most engaging moments out of a long video.
//!
//! # Overview
//!
//! A run goes through these stages, each resumable from its persisted artifact:
//! - Download the video and any platform captions (or use a local file)
//! - Caption it, transcribing when the platform has no captions
//! - Split it into caption-aligned segments of bounded length
//! - Ask a language model for candidate highlights in each segment
//! - Merge the candidates into one globally ranked top-K list
//! - Cut each highlight into a clip with re-zeroed captions
//! - Burn titles into the clips and render cover images
//!
//! # Architecture
//!
//! - `config` - Configuration and prompt templates
//! - `timing` - Millisecond times tagged with their coordinate space
//! - `captions` - Caption tracks and SRT/WebVTT parsing
//! - `media_source` - Source abstraction (YouTube, Bilibili, local files)
//! - `media` - yt-dlp and ffmpeg plumbing
//! - `transcription` - Speech-to-text fallback
//! - `segmenting` - Caption-aligned segmentation
//! - `analysis` - Per-segment candidate collection
//! - `aggregation` - Global ranking of candidates
//! - `clips` - Clip synthesis
//! - `render` - Title and cover rendering
//! - `pipeline` - Stage state machine and artifacts
//! - `orchestrator` - Pipeline coordination
//!
//! # Example
//!
//! ```rust,no_run
//! use klipp::config::Settings;
//! use klipp::orchestrator::{Orchestrator, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let options = RunOptions::from_settings(&settings)?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let result = orchestrator.run("https://youtu.be/dQw4w9WgXcQ", &options).await?;
//!     for highlight in &result.highlights.highlights {
//!         println!("#{} {}", highlight.rank, highlight.title);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod analysis;
pub mod captions;
pub mod cli;
pub mod clips;
pub mod config;
pub mod error;
pub mod media;
pub mod media_source;
pub mod openai;
pub mod orchestrator;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod segmenting;
pub mod timing;
pub mod transcription;

pub use error::{KlippError, Result};
