//! Concurrent per-segment candidate collection.

use super::{AnalysisContext, EngagementAnalyzer, HighlightCandidate};
use crate::error::Result;
use crate::retry::{retry_async, RetryConfig, RetryResult};
use crate::segmenting::Segment;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// How analysis of one segment settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SegmentOutcome {
    Succeeded { candidates: Vec<HighlightCandidate> },
    Failed { reason: String, attempts: u32 },
}

/// Settled analysis result for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCandidates {
    pub segment_index: usize,
    pub outcome: SegmentOutcome,
}

impl SegmentCandidates {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SegmentOutcome::Succeeded { .. })
    }

    pub fn candidates(&self) -> &[HighlightCandidate] {
        match &self.outcome {
            SegmentOutcome::Succeeded { candidates } => candidates,
            SegmentOutcome::Failed { .. } => &[],
        }
    }
}

/// All segments' outcomes, in segment order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub segments: Vec<SegmentCandidates>,
}

impl CollectionReport {
    /// Flat candidate pool in segment order, then service order within a segment.
    pub fn pool(&self) -> Vec<HighlightCandidate> {
        self.segments.iter().flat_map(|s| s.candidates().iter().cloned()).collect()
    }

    pub fn failed_segments(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| !s.is_success())
            .map(|s| s.segment_index)
            .collect()
    }
}

/// Fans analysis out over segments with bounded concurrency.
pub struct CandidateCollector<'a> {
    analyzer: &'a dyn EngagementAnalyzer,
    retry: RetryConfig,
    max_concurrent: usize,
    show_progress: bool,
}

impl<'a> CandidateCollector<'a> {
    pub fn new(analyzer: &'a dyn EngagementAnalyzer, retry: RetryConfig, max_concurrent: usize) -> Self {
        Self {
            analyzer,
            retry,
            max_concurrent: max_concurrent.max(1),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Analyze every segment and wait for all of them to settle.
    ///
    /// Segments that already succeeded in `previous` are reused without a
    /// call. A segment whose calls keep failing contributes no candidates; the
    /// rest of the run carries on. `on_settled` sees each freshly settled
    /// segment as it completes, so its result can be persisted right away.
    #[instrument(skip_all, fields(segments = segments.len()))]
    pub async fn collect<F>(
        &self,
        segments: &[Segment],
        context: &AnalysisContext,
        previous: &HashMap<usize, SegmentCandidates>,
        mut on_settled: F,
    ) -> Result<CollectionReport>
    where
        F: FnMut(&SegmentCandidates) -> Result<()>,
    {
        let mut settled: Vec<SegmentCandidates> = Vec::with_capacity(segments.len());
        let mut pending: Vec<&Segment> = Vec::new();

        for segment in segments {
            match previous.get(&segment.index).filter(|p| p.is_success()) {
                Some(done) => settled.push(done.clone()),
                None => pending.push(segment),
            }
        }

        if !settled.is_empty() {
            info!("Reusing analysis for {} segment(s)", settled.len());
        }

        let pb = if self.show_progress {
            ProgressBar::new(pending.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template("  {spinner:.green} Analyze   [{bar:30.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }

        let mut stream = stream::iter(pending)
            .map(|segment| async move { self.analyze_one(segment, context).await })
            .buffer_unordered(self.max_concurrent);

        while let Some(result) = stream.next().await {
            pb.inc(1);
            on_settled(&result)?;
            settled.push(result);
        }
        pb.finish_and_clear();

        settled.sort_by_key(|s| s.segment_index);
        Ok(CollectionReport { segments: settled })
    }

    async fn analyze_one(&self, segment: &Segment, context: &AnalysisContext) -> SegmentCandidates {
        if segment.duration.is_zero() {
            return SegmentCandidates {
                segment_index: segment.index,
                outcome: SegmentOutcome::Succeeded { candidates: Vec::new() },
            };
        }

        let retry = RetryConfig {
            operation_name: format!("analysis of segment {}", segment.index),
            ..self.retry.clone()
        };

        let outcome = match retry_async(&retry, |_| self.analyzer.analyze_segment(segment, context)).await {
            RetryResult::Success { value, .. } => {
                let total = value.len();
                let candidates: Vec<HighlightCandidate> = value
                    .into_iter()
                    .filter_map(|raw| match HighlightCandidate::from_raw(raw, segment) {
                        Ok(c) => Some(c),
                        Err(e) => {
                            warn!("Segment {}: dropping candidate: {}", segment.index, e);
                            None
                        }
                    })
                    .collect();
                info!(
                    "Segment {}: {} candidate(s), {} dropped",
                    segment.index,
                    candidates.len(),
                    total - candidates.len()
                );
                SegmentOutcome::Succeeded { candidates }
            }
            RetryResult::Failed { error, attempts } => {
                warn!(
                    "Segment {}: analysis failed after {} attempt(s), contributing no candidates: {}",
                    segment.index, attempts, error
                );
                SegmentOutcome::Failed {
                    reason: error.to_string(),
                    attempts,
                }
            }
        };

        SegmentCandidates {
            segment_index: segment.index,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::raw;
    use crate::analysis::{RawCandidate, ScoreTier, SelectionRequest, ServiceSelection};
    use crate::captions::CaptionTrack;
    use crate::error::KlippError;
    use crate::timing::{Millis, SourceTime};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns one candidate per segment; segments listed in `failing` always time out.
    struct ScriptedAnalyzer {
        failing: Vec<usize>,
        calls: AtomicUsize,
        flaky_once: Mutex<Vec<usize>>,
    }

    impl ScriptedAnalyzer {
        fn new(failing: Vec<usize>) -> Self {
            Self {
                failing,
                calls: AtomicUsize::new(0),
                flaky_once: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EngagementAnalyzer for ScriptedAnalyzer {
        async fn analyze_segment(&self, segment: &Segment, _context: &AnalysisContext) -> Result<Vec<RawCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&segment.index) {
                return Err(KlippError::Timeout(1));
            }
            {
                let mut flaky = self.flaky_once.lock().unwrap();
                if let Some(pos) = flaky.iter().position(|i| *i == segment.index) {
                    flaky.remove(pos);
                    return Err(KlippError::Analysis("malformed".into()));
                }
            }
            Ok(vec![
                raw(1_000, 40_000, &format!("seg{}", segment.index), ScoreTier::High),
                raw(50_000, 999_000, "runs past the end", ScoreTier::Low),
            ])
        }

        async fn select(&self, _pool: &[HighlightCandidate], _request: &SelectionRequest) -> Result<ServiceSelection> {
            Ok(ServiceSelection::default())
        }
    }

    fn segments(n: usize) -> Vec<Segment> {
        (0..n)
            .map(|i| Segment {
                index: i,
                media: PathBuf::from(format!("part_{:02}.mp4", i)),
                offset: SourceTime::from_millis(i as u64 * 60_000),
                duration: Millis(60_000),
                captions: CaptionTrack::new(),
            })
            .collect()
    }

    fn context() -> AnalysisContext {
        AnalysisContext {
            segment_count: 3,
            background: None,
            language: "en".into(),
            min_duration: Millis::from_secs(10),
            max_duration: Millis::from_secs(120),
            candidates_per_segment: 5,
            debug_dir: None,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new("test")
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(1))
            .with_timeout(Some(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_failed_segment_degrades_only_itself() {
        let analyzer = ScriptedAnalyzer::new(vec![1]);
        let collector = CandidateCollector::new(&analyzer, fast_retry(), 2).with_progress(false);

        let mut persisted = Vec::new();
        let report = collector
            .collect(&segments(3), &context(), &HashMap::new(), |s| {
                persisted.push(s.segment_index);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(report.failed_segments(), vec![1]);
        assert_eq!(
            report.segments.iter().map(|s| s.segment_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        let pool = report.pool();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].title, "seg0");
        assert_eq!(pool[1].absolute_start, SourceTime::from_millis(121_000));

        // Three attempts for the failing segment plus one each for the others.
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 5);
        persisted.sort();
        assert_eq!(persisted, vec![0, 1, 2]);
        match &report.segments[1].outcome {
            SegmentOutcome::Failed { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_retried() {
        let analyzer = ScriptedAnalyzer::new(vec![]);
        analyzer.flaky_once.lock().unwrap().push(0);
        let collector = CandidateCollector::new(&analyzer, fast_retry(), 1).with_progress(false);

        let report = collector
            .collect(&segments(1), &context(), &HashMap::new(), |_| Ok(()))
            .await
            .unwrap();

        assert!(report.failed_segments().is_empty());
        assert_eq!(report.pool().len(), 1);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_previous_successes_are_reused() {
        let analyzer = ScriptedAnalyzer::new(vec![]);
        let collector = CandidateCollector::new(&analyzer, fast_retry(), 2).with_progress(false);
        let segs = segments(2);

        let first = collector
            .collect(&segs, &context(), &HashMap::new(), |_| Ok(()))
            .await
            .unwrap();
        let previous: HashMap<usize, SegmentCandidates> =
            first.segments.iter().map(|s| (s.segment_index, s.clone())).collect();

        let second = collector
            .collect(&segs, &context(), &previous, |_| panic!("nothing should settle"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    }
}
