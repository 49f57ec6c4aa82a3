//! Clip synthesis: cutting each ranked highlight out of its segment.

use crate::aggregation::{AggregatedHighlight, HighlightSet};
use crate::captions::CaptionTrack;
use crate::error::{KlippError, Result};
use crate::media::MediaExtractor;
use crate::retry::{retry_async, RetryConfig, RetryResult};
use crate::segmenting::Segment;
use crate::timing::{Millis, SegmentTime, SourceTime};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

const MAX_TITLE_CHARS: usize = 50;

/// A synthesized clip. Captions start at clip time zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub rank: usize,
    pub title: String,
    pub segment_index: usize,
    pub local_start: SegmentTime,
    pub local_end: SegmentTime,
    pub absolute_start: SourceTime,
    pub absolute_end: SourceTime,
    pub media_path: PathBuf,
    pub caption_path: Option<PathBuf>,
    pub captions: CaptionTrack,
}

impl Clip {
    pub fn duration(&self) -> Millis {
        self.local_end.since(self.local_start).unwrap_or(Millis::ZERO)
    }

    /// File stem shared by derived artifacts (titles, covers).
    pub fn file_stem(&self) -> String {
        clip_file_stem(self.rank, &self.title)
    }
}

/// Result of synthesizing one highlight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClipOutcome {
    Created(Clip),
    Failed { rank: usize, title: String, reason: String },
}

impl ClipOutcome {
    pub fn rank(&self) -> usize {
        match self {
            ClipOutcome::Created(clip) => clip.rank,
            ClipOutcome::Failed { rank, .. } => *rank,
        }
    }
}

/// Outcomes for every highlight, in rank order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipBatch {
    pub outcomes: Vec<ClipOutcome>,
}

impl ClipBatch {
    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.outcomes.iter().filter_map(|o| match o {
            ClipOutcome::Created(clip) => Some(clip),
            ClipOutcome::Failed { .. } => None,
        })
    }

    pub fn failed_ranks(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ClipOutcome::Failed { .. }))
            .map(ClipOutcome::rank)
            .collect()
    }

    /// Every created clip's media must still exist on disk.
    pub fn validate(&self) -> Result<()> {
        for clip in self.clips() {
            if !clip.media_path.is_file() {
                return Err(KlippError::Artifact {
                    path: clip.media_path.clone(),
                    reason: format!("clip {} media is missing", clip.rank),
                });
            }
        }
        Ok(())
    }
}

/// Where a highlight lives inside its segment, and its re-zeroed captions.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlan<'s> {
    pub segment: &'s Segment,
    pub local_start: SegmentTime,
    pub local_end: SegmentTime,
    pub captions: CaptionTrack,
}

/// Resolve a highlight against the segments it was selected from.
///
/// A highlight naming an unknown segment or lying outside its segment is a
/// logic defect upstream and fails the whole stage.
pub fn plan_clip<'s>(highlight: &AggregatedHighlight, segments: &'s [Segment]) -> Result<ClipPlan<'s>> {
    let segment = segments
        .iter()
        .find(|s| s.index == highlight.source_segment_index)
        .ok_or_else(|| {
            KlippError::InvariantViolation(format!(
                "highlight {} refers to unknown segment {}",
                highlight.rank, highlight.source_segment_index
            ))
        })?;

    let local_start = segment.to_local(highlight.absolute_start)?;
    let local_end = segment.to_local(highlight.absolute_end)?;
    if local_start >= local_end {
        return Err(KlippError::InvariantViolation(format!(
            "highlight {} has an empty range",
            highlight.rank
        )));
    }

    let captions = segment
        .captions
        .subrange(local_start.offset(), local_end.offset())
        .shift(-local_start.offset().as_signed())?;

    Ok(ClipPlan {
        segment,
        local_start,
        local_end,
        captions,
    })
}

/// `rank_NN_<title>` with the title reduced to letters, digits, `-` and `_`.
pub fn clip_file_stem(rank: usize, title: &str) -> String {
    let sanitized: String = title
        .trim()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .take(MAX_TITLE_CHARS)
        .collect();

    if sanitized.is_empty() {
        format!("rank_{:02}", rank)
    } else {
        format!("rank_{:02}_{}", rank, sanitized)
    }
}

/// Cuts clips for a highlight set.
pub struct ClipSynthesizer<'a> {
    extractor: &'a dyn MediaExtractor,
    output_dir: PathBuf,
    write_captions: bool,
    show_progress: bool,
    retry: RetryConfig,
}

impl<'a> ClipSynthesizer<'a> {
    pub fn new(extractor: &'a dyn MediaExtractor, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            output_dir: output_dir.into(),
            write_captions: true,
            show_progress: true,
            retry: RetryConfig::new("clip extraction"),
        }
    }

    /// Deadline and attempts for each extraction.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_captions(mut self, write: bool) -> Self {
        self.write_captions = write;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Synthesize one clip.
    ///
    /// Timing errors are returned as `Err`. Problems with the media itself
    /// come back as [`ClipOutcome::Failed`] so the batch can continue.
    #[instrument(skip_all, fields(rank = highlight.rank))]
    pub async fn synthesize(&self, highlight: &AggregatedHighlight, segments: &[Segment]) -> Result<ClipOutcome> {
        let plan = plan_clip(highlight, segments)?;

        let failed = |reason: String| {
            warn!("Clip {} failed: {}", highlight.rank, reason);
            ClipOutcome::Failed {
                rank: highlight.rank,
                title: highlight.title.clone(),
                reason,
            }
        };

        if !plan.segment.media.is_file() {
            return Ok(failed(format!(
                "segment {} media not found: {}",
                plan.segment.index,
                plan.segment.media.display()
            )));
        }

        let stem = clip_file_stem(highlight.rank, &highlight.title);
        let media_path = self.output_dir.join(format!("{}.mp4", stem));

        let extracted = retry_async(&self.retry, |_| {
            self.extractor.extract(
                &plan.segment.media,
                plan.local_start.offset(),
                plan.local_end.offset(),
                &media_path,
            )
        })
        .await;
        if let RetryResult::Failed { error, attempts } = extracted {
            return Ok(failed(format!("{} (after {} attempt(s))", error, attempts)));
        }

        let caption_path = if self.write_captions {
            let path = self.output_dir.join(format!("{}.srt", stem));
            match std::fs::write(&path, plan.captions.to_srt()) {
                Ok(()) => Some(path),
                Err(e) => {
                    warn!("Clip {}: could not write captions: {}", highlight.rank, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(ClipOutcome::Created(Clip {
            rank: highlight.rank,
            title: highlight.title.clone(),
            segment_index: plan.segment.index,
            local_start: plan.local_start,
            local_end: plan.local_end,
            absolute_start: highlight.absolute_start,
            absolute_end: highlight.absolute_end,
            media_path,
            caption_path,
            captions: plan.captions,
        }))
    }

    /// Synthesize every highlight in rank order.
    pub async fn synthesize_all(&self, set: &HighlightSet, segments: &[Segment]) -> Result<ClipBatch> {
        ensure_dir(&self.output_dir)?;

        let pb = if self.show_progress {
            ProgressBar::new(set.highlights.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template("  {spinner:.green} Clips     [{bar:30.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }

        let mut outcomes = Vec::with_capacity(set.highlights.len());
        for highlight in &set.highlights {
            let outcome = self.synthesize(highlight, segments).await;
            pb.inc(1);
            match outcome {
                Ok(o) => outcomes.push(o),
                Err(e) => {
                    pb.finish_and_clear();
                    return Err(e);
                }
            }
        }
        pb.finish_and_clear();

        let batch = ClipBatch { outcomes };
        info!(
            "Synthesized {} clip(s), {} failed",
            batch.clips().count(),
            batch.failed_ranks().len()
        );
        Ok(batch)
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}
