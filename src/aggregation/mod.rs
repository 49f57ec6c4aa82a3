//! Aggregation of the candidate pool into a ranked highlight list.
//!
//! Ordering is by score tier, then by how close a candidate's length is to
//! the target, then by pool position. Candidates outside the duration bounds
//! never enter the ranking. Two picks from the same segment must be at least
//! `min_separation` apart; the later one in ranking order is demoted.

use crate::analysis::{EngagementAnalyzer, HighlightCandidate, ScoreTier, SelectionRequest, ServiceSelection};
use crate::config::{AggregationMode, AggregationSettings};
use crate::error::{KlippError, Result};
use crate::timing::{Millis, SegmentTime, SourceTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Parameters a highlight set was selected with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    /// Mode that actually produced the set.
    pub mode: AggregationMode,
    pub max_clips: usize,
    pub min_duration: Millis,
    pub max_duration: Millis,
    pub target_duration: Millis,
    pub min_separation: Millis,
    pub max_honorable_mentions: usize,
}

impl SelectionCriteria {
    pub fn from_settings(settings: &AggregationSettings, mode: AggregationMode) -> Self {
        Self {
            mode,
            max_clips: settings.max_clips,
            min_duration: Millis::from_secs(settings.min_duration_secs),
            max_duration: Millis::from_secs(settings.max_duration_secs),
            target_duration: Millis::from_secs(settings.target_duration_secs),
            min_separation: Millis::from_secs(settings.min_separation_secs),
            max_honorable_mentions: settings.max_honorable_mentions,
        }
    }

    fn accepts(&self, candidate: &HighlightCandidate) -> bool {
        let d = candidate.duration();
        d >= self.min_duration && d <= self.max_duration
    }
}

/// One ranked highlight in source time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedHighlight {
    pub rank: usize,
    pub absolute_start: SourceTime,
    pub absolute_end: SourceTime,
    pub source_segment_index: usize,
    pub title: String,
    pub transcript_excerpt: String,
    pub score_tier: ScoreTier,
    pub rationale: String,
    pub tags: BTreeSet<String>,
}

impl AggregatedHighlight {
    fn from_candidate(rank: usize, c: &HighlightCandidate) -> Self {
        Self {
            rank,
            absolute_start: c.absolute_start,
            absolute_end: c.absolute_end,
            source_segment_index: c.segment_index,
            title: c.title.clone(),
            transcript_excerpt: c.transcript_excerpt.clone(),
            score_tier: c.score_tier,
            rationale: c.rationale.clone(),
            tags: c.tags.clone(),
        }
    }

    pub fn duration(&self) -> Millis {
        self.absolute_end.since(self.absolute_start).unwrap_or(Millis::ZERO)
    }
}

/// Final selection plus near misses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightSet {
    pub highlights: Vec<AggregatedHighlight>,
    pub honorable_mentions: Vec<HighlightCandidate>,
    pub criteria: SelectionCriteria,
}

impl HighlightSet {
    /// Ranks must be exactly `1..=n` in order, with `n <= max_clips`, and every
    /// highlight must have a positive length.
    pub fn validate(&self) -> Result<()> {
        if self.highlights.len() > self.criteria.max_clips {
            return Err(KlippError::InvariantViolation(format!(
                "{} highlights selected, limit is {}",
                self.highlights.len(),
                self.criteria.max_clips
            )));
        }
        for (i, h) in self.highlights.iter().enumerate() {
            if h.rank != i + 1 {
                return Err(KlippError::InvariantViolation(format!(
                    "highlight at position {} has rank {}",
                    i + 1,
                    h.rank
                )));
            }
            if h.absolute_start >= h.absolute_end {
                return Err(KlippError::InvariantViolation(format!(
                    "highlight {} has an empty range",
                    h.rank
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, rank: usize) -> Option<&AggregatedHighlight> {
        self.highlights.iter().find(|h| h.rank == rank)
    }
}

/// Reduces a candidate pool to at most K ranked highlights.
#[derive(Debug, Clone)]
pub struct Aggregator {
    criteria: SelectionCriteria,
}

impl Aggregator {
    pub fn new(criteria: SelectionCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &SelectionCriteria {
        &self.criteria
    }

    /// Aggregate according to the configured mode.
    ///
    /// In service mode the analyzer picks from the pool and the pick is then
    /// normalized locally. Any service failure falls back to local ranking.
    pub async fn run(
        &self,
        pool: &[HighlightCandidate],
        analyzer: &dyn EngagementAnalyzer,
        request: &SelectionRequest,
    ) -> HighlightSet {
        if self.criteria.mode == AggregationMode::Service && !pool.is_empty() {
            match analyzer.select(pool, request).await {
                Ok(selection) => return self.apply_selection(pool, &selection),
                Err(e) => warn!("Service aggregation failed, ranking locally: {}", e),
            }
        }
        self.aggregate(pool)
    }

    /// Rank the pool locally.
    pub fn aggregate(&self, pool: &[HighlightCandidate]) -> HighlightSet {
        let mut ordered: Vec<(usize, &HighlightCandidate)> = pool
            .iter()
            .enumerate()
            .filter(|(_, c)| self.criteria.accepts(c))
            .collect();

        let target = self.criteria.target_duration;
        ordered.sort_by_key(|(position, c)| (c.score_tier, c.duration().abs_diff(target), *position));

        let ordered: Vec<&HighlightCandidate> = ordered.into_iter().map(|(_, c)| c).collect();
        self.finalize(ordered, Vec::new(), AggregationMode::Local)
    }

    /// Normalize a service selection against the pool, keeping the service's order.
    pub fn apply_selection(&self, pool: &[HighlightCandidate], selection: &ServiceSelection) -> HighlightSet {
        let top = self.pick(pool, &selection.top);
        let honorable = self.pick(pool, &selection.honorable);
        self.finalize(top, honorable, AggregationMode::Service)
    }

    fn pick<'p>(&self, pool: &'p [HighlightCandidate], ids: &[usize]) -> Vec<&'p HighlightCandidate> {
        ids.iter()
            .filter_map(|id| pool.get(*id))
            .filter(|c| self.criteria.accepts(c))
            .collect()
    }

    /// Re-run normalization on an existing set. Produces the same set.
    pub fn renormalize(&self, set: &HighlightSet) -> HighlightSet {
        let as_candidates: Vec<HighlightCandidate> = set
            .highlights
            .iter()
            .map(|h| HighlightCandidate {
                segment_index: h.source_segment_index,
                local_start: SegmentTime::ORIGIN,
                local_end: SegmentTime::new(h.duration()),
                absolute_start: h.absolute_start,
                absolute_end: h.absolute_end,
                title: h.title.clone(),
                transcript_excerpt: h.transcript_excerpt.clone(),
                score_tier: h.score_tier,
                rationale: h.rationale.clone(),
                tags: h.tags.clone(),
            })
            .collect();

        let ordered: Vec<&HighlightCandidate> = as_candidates.iter().filter(|c| self.criteria.accepts(c)).collect();
        let mut renormalized = self.finalize(ordered, Vec::new(), set.criteria.mode);
        renormalized.honorable_mentions = set.honorable_mentions.clone();
        renormalized
    }

    /// Apply the diversity rule and the K cap to an already ordered list.
    ///
    /// Of two clashing candidates the higher tier is kept. Ties keep the one
    /// that came first.
    fn finalize(
        &self,
        ordered: Vec<&HighlightCandidate>,
        extra_mentions: Vec<&HighlightCandidate>,
        mode: AggregationMode,
    ) -> HighlightSet {
        let mut selected: Vec<&HighlightCandidate> = Vec::new();
        let mut overflow: Vec<&HighlightCandidate> = Vec::new();

        for candidate in ordered {
            let clashing: Vec<usize> = (0..selected.len())
                .filter(|&i| self.conflicts(selected[i], candidate))
                .collect();

            if clashing.is_empty() {
                if selected.len() < self.criteria.max_clips {
                    selected.push(candidate);
                } else {
                    overflow.push(candidate);
                }
            } else if clashing.iter().all(|&i| candidate.score_tier < selected[i].score_tier) {
                // A higher tier takes the slot of the first pick it clashes with.
                for &i in clashing.iter().skip(1).rev() {
                    overflow.push(selected.remove(i));
                }
                overflow.push(std::mem::replace(&mut selected[clashing[0]], candidate));
            } else {
                overflow.push(candidate);
            }
        }

        for extra in extra_mentions {
            if !selected.contains(&extra) && !overflow.contains(&extra) {
                overflow.push(extra);
            }
        }
        overflow.truncate(self.criteria.max_honorable_mentions);

        let highlights: Vec<AggregatedHighlight> = selected
            .iter()
            .enumerate()
            .map(|(i, c)| AggregatedHighlight::from_candidate(i + 1, c))
            .collect();

        info!(
            "Selected {} highlight(s) ({} mode), {} honorable mention(s)",
            highlights.len(),
            mode,
            overflow.len()
        );

        HighlightSet {
            highlights,
            honorable_mentions: overflow.into_iter().cloned().collect(),
            criteria: SelectionCriteria { mode, ..self.criteria },
        }
    }

    /// Same segment and overlapping, or closer than the minimum separation.
    fn conflicts(&self, a: &HighlightCandidate, b: &HighlightCandidate) -> bool {
        if a.segment_index != b.segment_index {
            return false;
        }
        let (first, second) = if a.absolute_start <= b.absolute_start { (a, b) } else { (b, a) };
        match second.absolute_start.since(first.absolute_end) {
            Some(gap) => gap < self.criteria.min_separation,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn criteria(max_clips: usize) -> SelectionCriteria {
        SelectionCriteria {
            mode: AggregationMode::Local,
            max_clips,
            min_duration: Millis::from_secs(30),
            max_duration: Millis::from_secs(240),
            target_duration: Millis::from_secs(90),
            min_separation: Millis::from_secs(10),
            max_honorable_mentions: 5,
        }
    }

    fn candidate(segment: usize, start_s: u64, len_s: u64, tier: ScoreTier, title: &str) -> HighlightCandidate {
        HighlightCandidate {
            segment_index: segment,
            local_start: SegmentTime::from_millis(start_s * 1000),
            local_end: SegmentTime::from_millis((start_s + len_s) * 1000),
            absolute_start: SourceTime::from_millis(start_s * 1000),
            absolute_end: SourceTime::from_millis((start_s + len_s) * 1000),
            title: title.to_string(),
            transcript_excerpt: String::new(),
            score_tier: tier,
            rationale: String::new(),
            tags: BTreeSet::new(),
        }
    }

    fn titles(set: &HighlightSet) -> Vec<&str> {
        set.highlights.iter().map(|h| h.title.as_str()).collect()
    }

    fn eight_candidates() -> Vec<HighlightCandidate> {
        use ScoreTier::*;
        vec![
            candidate(0, 0, 60, Low, "low-a"),
            candidate(0, 200, 90, Medium, "med-exact"),
            candidate(1, 1300, 80, High, "high-a"),
            candidate(1, 1500, 95, Medium, "med-near"),
            candidate(2, 2500, 200, High, "high-b"),
            candidate(2, 2800, 40, Low, "low-b"),
            candidate(3, 3700, 90, High, "high-c"),
            candidate(3, 3900, 150, Medium, "med-long"),
        ]
    }

    #[test]
    fn test_tiers_fill_in_order() {
        let pool = eight_candidates();
        let set = Aggregator::new(criteria(5)).aggregate(&pool);

        // Highs by closeness to 90s, then the two mediums closest to 90s.
        assert_eq!(titles(&set), vec!["high-c", "high-a", "high-b", "med-exact", "med-near"]);
        let ranks: Vec<usize> = set.highlights.iter().map(|h| h.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);

        let overflow: Vec<&str> = set.honorable_mentions.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(overflow, vec!["med-long", "low-a", "low-b"]);
        set.validate().unwrap();
    }

    #[test]
    fn test_fewer_valid_than_k() {
        let pool = vec![
            candidate(0, 0, 10, ScoreTier::High, "too-short"),
            candidate(0, 100, 400, ScoreTier::High, "too-long"),
            candidate(1, 1000, 60, ScoreTier::Low, "ok"),
        ];
        let set = Aggregator::new(criteria(5)).aggregate(&pool);
        assert_eq!(titles(&set), vec!["ok"]);
        assert_eq!(set.highlights[0].rank, 1);
        assert!(set.honorable_mentions.is_empty());
    }

    #[test]
    fn test_empty_pool_is_not_an_error() {
        let set = Aggregator::new(criteria(5)).aggregate(&[]);
        assert!(set.highlights.is_empty());
        set.validate().unwrap();
    }

    #[test]
    fn test_same_segment_too_close_is_demoted() {
        let pool = vec![
            candidate(0, 100, 60, ScoreTier::High, "first"),
            // 5s after the first ends, same segment.
            candidate(0, 165, 60, ScoreTier::Medium, "crowded"),
            // Same timing but another segment does not conflict.
            candidate(1, 165, 60, ScoreTier::Medium, "elsewhere"),
            candidate(0, 240, 60, ScoreTier::Low, "spaced"),
        ];
        let set = Aggregator::new(criteria(5)).aggregate(&pool);
        assert_eq!(titles(&set), vec!["first", "elsewhere", "spaced"]);
        assert_eq!(set.honorable_mentions[0].title, "crowded");
    }

    #[test]
    fn test_rank_density_across_k() {
        let pool = eight_candidates();
        for k in 0..10 {
            let set = Aggregator::new(criteria(k)).aggregate(&pool);
            let expected: Vec<usize> = (1..=k.min(pool.len())).collect();
            let ranks: Vec<usize> = set.highlights.iter().map(|h| h.rank).collect();
            assert_eq!(ranks, expected);
        }
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let aggregator = Aggregator::new(criteria(5));
        let set = aggregator.aggregate(&eight_candidates());
        assert_eq!(aggregator.renormalize(&set), set);
    }

    #[test]
    fn test_service_selection_keeps_service_order() {
        let pool = eight_candidates();
        let aggregator = Aggregator::new(SelectionCriteria {
            mode: AggregationMode::Service,
            ..criteria(3)
        });
        let selection = ServiceSelection {
            // 0 is low tier but the service prefers it; 99 is unknown.
            top: vec![0, 6, 99, 2, 4],
            honorable: vec![1],
        };

        let set = aggregator.apply_selection(&pool, &selection);
        assert_eq!(titles(&set), vec!["low-a", "high-c", "high-a"]);
        assert_eq!(set.criteria.mode, AggregationMode::Service);
        let overflow: Vec<&str> = set.honorable_mentions.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(overflow, vec!["high-b", "med-exact"]);
        assert_eq!(aggregator.renormalize(&set), set);
    }

    #[test]
    fn test_service_conflict_keeps_higher_tier() {
        let pool = vec![
            candidate(0, 100, 60, ScoreTier::Low, "low-early"),
            candidate(1, 500, 60, ScoreTier::Medium, "other-segment"),
            // Overlaps low-early in the same segment.
            candidate(0, 130, 60, ScoreTier::High, "high-overlap"),
            candidate(0, 400, 60, ScoreTier::Medium, "spaced"),
        ];
        let aggregator = Aggregator::new(SelectionCriteria {
            mode: AggregationMode::Service,
            ..criteria(3)
        });
        let selection = ServiceSelection {
            top: vec![0, 1, 2, 3],
            honorable: Vec::new(),
        };

        let set = aggregator.apply_selection(&pool, &selection);
        assert_eq!(titles(&set), vec!["high-overlap", "other-segment", "spaced"]);
        let overflow: Vec<&str> = set.honorable_mentions.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(overflow, vec!["low-early"]);
        set.validate().unwrap();
        assert_eq!(aggregator.renormalize(&set), set);
    }

    struct BrokenService;

    #[async_trait]
    impl EngagementAnalyzer for BrokenService {
        async fn analyze_segment(
            &self,
            _segment: &crate::segmenting::Segment,
            _context: &crate::analysis::AnalysisContext,
        ) -> Result<Vec<crate::analysis::RawCandidate>> {
            Ok(Vec::new())
        }

        async fn select(&self, _pool: &[HighlightCandidate], _request: &SelectionRequest) -> Result<ServiceSelection> {
            Err(KlippError::Analysis("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_service_failure_falls_back_to_local() {
        let pool = eight_candidates();
        let aggregator = Aggregator::new(SelectionCriteria {
            mode: AggregationMode::Service,
            ..criteria(5)
        });
        let request = SelectionRequest {
            max_clips: 5,
            max_mentions: 5,
            language: "en".into(),
            debug_dir: None,
        };

        let set = aggregator.run(&pool, &BrokenService, &request).await;
        assert_eq!(set.criteria.mode, AggregationMode::Local);
        assert_eq!(set.highlights, Aggregator::new(criteria(5)).aggregate(&pool).highlights);
    }
}
