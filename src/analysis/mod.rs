//! Engagement analysis.
//!
//! The [`EngagementAnalyzer`] collaborator proposes highlight candidates for
//! one segment at a time, in segment-local time. The [`CandidateCollector`]
//! fans those calls out over all segments and converts every candidate into
//! source time.

mod collector;
mod llm;

pub use collector::{CandidateCollector, CollectionReport, SegmentCandidates, SegmentOutcome};
pub use llm::{extract_json, parse_moments, parse_selection, LlmAnalyzer};

use crate::error::{KlippError, Result};
use crate::segmenting::Segment;
use crate::timing::{Millis, SegmentTime, SourceTime};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Engagement tier reported by the analysis service. Orders best first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreTier {
    High,
    #[default]
    Medium,
    Low,
}

impl ScoreTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreTier::High => "high",
            ScoreTier::Medium => "medium",
            ScoreTier::Low => "low",
        }
    }

    /// Lenient parse for model output. Anything unrecognised is `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for ScoreTier {
    type Err = KlippError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "高" => Ok(ScoreTier::High),
            "medium" | "mid" | "中" => Ok(ScoreTier::Medium),
            "low" | "低" => Ok(ScoreTier::Low),
            other => Err(KlippError::InvalidInput(format!("unknown engagement level: {}", other))),
        }
    }
}

impl fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate as returned by the analysis service, in segment-local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub local_start: SegmentTime,
    pub local_end: SegmentTime,
    pub title: String,
    pub transcript_excerpt: String,
    pub score_tier: ScoreTier,
    pub rationale: String,
    pub tags: BTreeSet<String>,
}

/// A candidate attached to its segment, with both local and source timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightCandidate {
    pub segment_index: usize,
    pub local_start: SegmentTime,
    pub local_end: SegmentTime,
    pub absolute_start: SourceTime,
    pub absolute_end: SourceTime,
    pub title: String,
    pub transcript_excerpt: String,
    pub score_tier: ScoreTier,
    pub rationale: String,
    pub tags: BTreeSet<String>,
}

impl HighlightCandidate {
    /// Attach `raw` to `segment`. Title, tier and rationale pass through untouched.
    ///
    /// Fails if the local range is empty, inverted, or runs past the segment.
    pub fn from_raw(raw: RawCandidate, segment: &Segment) -> Result<Self> {
        if raw.local_start >= raw.local_end {
            return Err(KlippError::MalformedTiming(format!(
                "candidate '{}' has start {} not before end {}",
                raw.title, raw.local_start, raw.local_end
            )));
        }
        if !segment.contains_local(raw.local_end) {
            return Err(KlippError::TimingOutOfBounds(format!(
                "candidate '{}' ends at {}, segment {} lasts {}",
                raw.title, raw.local_end, segment.index, segment.duration
            )));
        }

        Ok(Self {
            segment_index: segment.index,
            absolute_start: segment.to_absolute(raw.local_start),
            absolute_end: segment.to_absolute(raw.local_end),
            local_start: raw.local_start,
            local_end: raw.local_end,
            title: raw.title,
            transcript_excerpt: raw.transcript_excerpt,
            score_tier: raw.score_tier,
            rationale: raw.rationale,
            tags: raw.tags,
        })
    }

    pub fn duration(&self) -> Millis {
        self.absolute_end.since(self.absolute_start).unwrap_or(Millis::ZERO)
    }
}

/// Everything a segment analysis call needs beyond the segment itself.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub segment_count: usize,
    pub background: Option<String>,
    pub language: String,
    pub min_duration: Millis,
    pub max_duration: Millis,
    pub candidates_per_segment: usize,
    /// When set, rendered prompts are written here.
    pub debug_dir: Option<PathBuf>,
}

/// Parameters for a service-side selection over the whole pool.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub max_clips: usize,
    pub max_mentions: usize,
    pub language: String,
    pub debug_dir: Option<PathBuf>,
}

/// Pool positions chosen by the service, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSelection {
    pub top: Vec<usize>,
    pub honorable: Vec<usize>,
}

/// Trait for engagement analysis services.
#[async_trait]
pub trait EngagementAnalyzer: Send + Sync {
    /// Propose candidates for one segment, in that segment's local time.
    async fn analyze_segment(&self, segment: &Segment, context: &AnalysisContext) -> Result<Vec<RawCandidate>>;

    /// Choose the best candidates from a pool, by position.
    async fn select(&self, pool: &[HighlightCandidate], request: &SelectionRequest) -> Result<ServiceSelection>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn raw(start_ms: u64, end_ms: u64, title: &str, tier: ScoreTier) -> RawCandidate {
        RawCandidate {
            local_start: SegmentTime::from_millis(start_ms),
            local_end: SegmentTime::from_millis(end_ms),
            title: title.to_string(),
            transcript_excerpt: String::new(),
            score_tier: tier,
            rationale: String::new(),
            tags: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::raw;
    use super::*;
    use crate::captions::CaptionTrack;

    fn segment(index: usize, offset_ms: u64, duration_ms: u64) -> Segment {
        Segment {
            index,
            media: PathBuf::from("part.mp4"),
            offset: SourceTime::from_millis(offset_ms),
            duration: Millis(duration_ms),
            captions: CaptionTrack::new(),
        }
    }

    #[test]
    fn test_tier_parse_and_order() {
        assert_eq!(ScoreTier::parse_lenient("HIGH"), ScoreTier::High);
        assert_eq!(ScoreTier::parse_lenient(" 低 "), ScoreTier::Low);
        assert_eq!(ScoreTier::parse_lenient("spicy"), ScoreTier::Medium);
        assert!(ScoreTier::High < ScoreTier::Medium && ScoreTier::Medium < ScoreTier::Low);
    }

    #[test]
    fn test_from_raw_offsets_into_source_time() {
        let seg = segment(2, 1_200_000, 600_000);
        let candidate = HighlightCandidate::from_raw(raw(30_000, 90_000, "a", ScoreTier::High), &seg).unwrap();

        assert_eq!(candidate.segment_index, 2);
        assert_eq!(candidate.absolute_start, SourceTime::from_millis(1_230_000));
        assert_eq!(candidate.absolute_end, SourceTime::from_millis(1_290_000));
        assert_eq!(candidate.duration(), Millis(60_000));
        assert_eq!(candidate.title, "a");
    }

    #[test]
    fn test_from_raw_rejects_bad_ranges() {
        let seg = segment(0, 0, 60_000);
        assert!(matches!(
            HighlightCandidate::from_raw(raw(10_000, 10_000, "empty", ScoreTier::Low), &seg),
            Err(KlippError::MalformedTiming(_))
        ));
        assert!(matches!(
            HighlightCandidate::from_raw(raw(50_000, 70_000, "late", ScoreTier::Low), &seg),
            Err(KlippError::TimingOutOfBounds(_))
        ));
        assert!(HighlightCandidate::from_raw(raw(50_000, 60_000, "edge", ScoreTier::Low), &seg).is_ok());
    }
}
