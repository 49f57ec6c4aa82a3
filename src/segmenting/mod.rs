//! Caption-aligned segmentation of long sources.
//!
//! The source is cut into parts no longer than a configured maximum. Cuts are
//! only placed where no caption is being spoken: at the end of the last cue
//! that fits, or inside an uncaptioned gap. A single cue longer than the
//! maximum gets a part of its own.

use crate::captions::CaptionTrack;
use crate::error::{KlippError, Result};
use crate::timing::{Millis, SegmentTime, SourceTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// A contiguous part of the source with its own zero-based captions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    /// Media holding exactly this part, starting at local time zero.
    pub media: PathBuf,
    pub offset: SourceTime,
    pub duration: Millis,
    /// Cues in segment-local time.
    pub captions: CaptionTrack,
}

impl Segment {
    /// Exclusive end in source time.
    pub fn end(&self) -> SourceTime {
        self.offset + self.duration
    }

    pub fn to_absolute(&self, local: SegmentTime) -> SourceTime {
        self.offset + local.offset()
    }

    /// Convert a source time into this segment's local time.
    ///
    /// Fails with [`KlippError::TimingOutOfBounds`] if `absolute` lies outside
    /// `[offset, offset + duration]`.
    pub fn to_local(&self, absolute: SourceTime) -> Result<SegmentTime> {
        let local = absolute
            .since(self.offset)
            .filter(|l| *l <= self.duration)
            .ok_or_else(|| {
                KlippError::TimingOutOfBounds(format!(
                    "{} is outside segment {} [{}, {}]",
                    absolute,
                    self.index,
                    self.offset,
                    self.end()
                ))
            })?;
        Ok(SegmentTime::new(local))
    }

    /// Whether a local time lies within `[0, duration]`.
    pub fn contains_local(&self, local: SegmentTime) -> bool {
        local.offset() <= self.duration
    }
}

/// Planned part boundaries, before any media is cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub index: usize,
    pub start: SourceTime,
    pub end: SourceTime,
}

impl SegmentPlan {
    pub fn duration(&self) -> Millis {
        self.end.since(self.start).unwrap_or(Millis::ZERO)
    }
}

/// Splits a source into segments of at most `max_duration`.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    max_duration: Millis,
}

impl Segmenter {
    pub fn new(max_duration: Millis) -> Result<Self> {
        if max_duration.is_zero() {
            return Err(KlippError::Config("maximum segment duration must be positive".into()));
        }
        Ok(Self { max_duration })
    }

    pub fn from_minutes(minutes: f64) -> Result<Self> {
        Self::new(Millis::from_secs_f64(minutes * 60.0))
    }

    pub fn max_duration(&self) -> Millis {
        self.max_duration
    }

    /// Compute part boundaries covering `[0, source_duration)`.
    ///
    /// The result is checked for coverage and cue alignment before it is
    /// returned; a violation is a logic defect and is reported as
    /// [`KlippError::InvariantViolation`].
    pub fn plan(&self, captions: &CaptionTrack, source_duration: Millis) -> Result<Vec<SegmentPlan>> {
        let boundaries = self.boundaries(captions, source_duration);

        let plans: Vec<SegmentPlan> = boundaries
            .windows(2)
            .enumerate()
            .map(|(index, pair)| SegmentPlan {
                index,
                start: SourceTime::new(pair[0]),
                end: SourceTime::new(pair[1]),
            })
            .collect();

        verify_plan(&plans, captions, source_duration)?;
        debug!("Planned {} segment(s) for {}", plans.len(), source_duration);
        Ok(plans)
    }

    /// Build segments for a plan. `media_for` names the media file holding each part.
    pub fn build(
        &self,
        plans: &[SegmentPlan],
        captions: &CaptionTrack,
        mut media_for: impl FnMut(&SegmentPlan) -> PathBuf,
    ) -> Result<Vec<Segment>> {
        plans
            .iter()
            .map(|plan| {
                let start = plan.start.offset();
                let local_captions = captions
                    .subrange(start, plan.end.offset())
                    .shift(-start.as_signed())?;
                Ok(Segment {
                    index: plan.index,
                    media: media_for(plan),
                    offset: plan.start,
                    duration: plan.duration(),
                    captions: local_captions,
                })
            })
            .collect()
    }

    /// Boundary list `[0, b1, ..., source_duration]`.
    fn boundaries(&self, captions: &CaptionTrack, source_duration: Millis) -> Vec<Millis> {
        let max = self.max_duration;

        if source_duration.is_zero() {
            return vec![Millis::ZERO, Millis::ZERO];
        }
        if captions.is_empty() || source_duration <= max {
            return vec![Millis::ZERO, source_duration];
        }

        let mut boundaries = vec![Millis::ZERO];
        let mut part_start = Millis::ZERO;
        // End of the last speech block fully inside the current part.
        let mut last_end: Option<Millis> = None;

        for (block_start, block_end) in speech_blocks(captions, source_duration) {
            loop {
                if block_end.saturating_sub(part_start) <= max {
                    last_end = Some(block_end);
                    break;
                }

                if let Some(end) = last_end.take() {
                    boundaries.push(end);
                    part_start = end;
                    continue;
                }

                if block_start > part_start {
                    // Nothing spoken yet in this part: cut inside the silence.
                    let cut = block_start.min(part_start + max);
                    boundaries.push(cut);
                    part_start = cut;
                    continue;
                }

                // A single block longer than the maximum.
                boundaries.push(block_end);
                part_start = block_end;
                break;
            }
        }

        if source_duration.saturating_sub(part_start) > max {
            if let Some(end) = last_end.filter(|e| *e > part_start) {
                boundaries.push(end);
                part_start = end;
            }
            while source_duration.saturating_sub(part_start) > max {
                part_start = part_start + max;
                boundaries.push(part_start);
            }
        }

        if part_start < source_duration {
            boundaries.push(source_duration);
        }
        boundaries
    }
}

/// Merge overlapping cues into maximal spans during which something is being
/// said, clamped to the source. Cues that merely touch stay separate, since
/// cutting at the shared instant splits no cue.
fn speech_blocks(captions: &CaptionTrack, source_duration: Millis) -> Vec<(Millis, Millis)> {
    let mut blocks: Vec<(Millis, Millis)> = Vec::new();

    for cue in captions.cues() {
        if cue.start >= source_duration {
            continue;
        }
        let end = cue.end.min(source_duration);
        match blocks.last_mut() {
            Some((_, block_end)) if cue.start < *block_end => {
                *block_end = (*block_end).max(end);
            }
            _ => blocks.push((cue.start, end)),
        }
    }

    blocks
}

/// Check that plans tile `[0, source_duration)` and that no internal boundary
/// falls strictly inside a cue.
pub fn verify_plan(plans: &[SegmentPlan], captions: &CaptionTrack, source_duration: Millis) -> Result<()> {
    let first = plans
        .first()
        .ok_or_else(|| KlippError::InvariantViolation("segmentation produced no segments".into()))?;
    if first.start != SourceTime::ORIGIN {
        return Err(KlippError::InvariantViolation(format!(
            "first segment starts at {}, not zero",
            first.start
        )));
    }

    for (i, plan) in plans.iter().enumerate() {
        if plan.index != i {
            return Err(KlippError::InvariantViolation(format!(
                "segment at position {} has index {}",
                i, plan.index
            )));
        }
        if plan.end < plan.start || (plan.end == plan.start && !source_duration.is_zero()) {
            return Err(KlippError::InvariantViolation(format!(
                "segment {} is empty or inverted ({} to {})",
                i, plan.start, plan.end
            )));
        }
        if let Some(next) = plans.get(i + 1) {
            if next.start != plan.end {
                return Err(KlippError::InvariantViolation(format!(
                    "gap or overlap between segment {} (ends {}) and {} (starts {})",
                    i, plan.end, next.index, next.start
                )));
            }
            let cut = plan.end.offset();
            if let Some(cue) = captions.cues().iter().find(|c| c.start < cut && cut < c.end) {
                return Err(KlippError::InvariantViolation(format!(
                    "boundary {} splits cue {} ({} to {})",
                    cut, cue.index, cue.start, cue.end
                )));
            }
        }
    }

    let last_end = plans.last().map(|p| p.end.offset()).unwrap_or(Millis::ZERO);
    if last_end != source_duration {
        return Err(KlippError::InvariantViolation(format!(
            "segments end at {}, source ends at {}",
            last_end, source_duration
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::CaptionCue;

    fn track(spans: &[(u64, u64)]) -> CaptionTrack {
        CaptionTrack::from_cues(
            spans
                .iter()
                .enumerate()
                .map(|(i, (s, e))| CaptionCue::new(i as u32 + 1, Millis(*s), Millis(*e), format!("line {}", i))),
        )
    }

    /// Cues every 5s, each 4.5s long, up to `total`.
    fn regular_track(total: Millis) -> CaptionTrack {
        let mut spans = Vec::new();
        let mut t = 0;
        while t + 4500 <= total.0 {
            spans.push((t, t + 4500));
            t += 5000;
        }
        track(&spans)
    }

    fn assert_covers(plans: &[SegmentPlan], total: Millis) {
        assert_eq!(plans[0].start, SourceTime::ORIGIN);
        for pair in plans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(plans.last().unwrap().end.offset(), total);
    }

    #[test]
    fn test_forty_five_minutes_in_three_parts() {
        let total = Millis::from_mins(45);
        let captions = regular_track(total);
        let segmenter = Segmenter::from_minutes(20.0).unwrap();

        let plans = segmenter.plan(&captions, total).unwrap();
        assert_eq!(plans.len(), 3);
        assert_covers(&plans, total);

        // Each internal boundary is the end of a cue, just short of 20 and 40 minutes.
        assert_eq!(plans[0].end.offset(), Millis(1_199_500));
        assert_eq!(plans[1].end.offset(), Millis(2_399_500));
        for plan in &plans[..2] {
            assert!(captions.cues().iter().any(|c| c.end == plan.end.offset()));
        }
        assert!(plans.iter().all(|p| p.duration() <= segmenter.max_duration()));
    }

    #[test]
    fn test_short_or_uncaptioned_source_is_single_segment() {
        let segmenter = Segmenter::from_minutes(20.0).unwrap();

        let plans = segmenter.plan(&CaptionTrack::new(), Millis::from_mins(90)).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].duration(), Millis::from_mins(90));

        let total = Millis::from_mins(10);
        let plans = segmenter.plan(&regular_track(total), total).unwrap();
        assert_eq!(plans.len(), 1);
    }

    #[test]
    fn test_zero_duration_source() {
        let segmenter = Segmenter::from_minutes(20.0).unwrap();
        let plans = segmenter.plan(&CaptionTrack::new(), Millis::ZERO).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].duration(), Millis::ZERO);
    }

    #[test]
    fn test_single_cue_longer_than_max() {
        let segmenter = Segmenter::new(Millis(10_000)).unwrap();
        let captions = track(&[(0, 3_000), (3_000, 25_000), (26_000, 28_000)]);
        let total = Millis(30_000);

        let plans = segmenter.plan(&captions, total).unwrap();
        assert_covers(&plans, total);
        // Closes after the first cue, then gives the long cue its own part.
        assert_eq!(plans[0].end.offset(), Millis(3_000));
        assert_eq!(plans[1].end.offset(), Millis(25_000));
        assert_eq!(plans.len(), 3);
    }

    #[test]
    fn test_long_silence_is_cut_by_max() {
        let segmenter = Segmenter::new(Millis(10_000)).unwrap();
        let captions = track(&[(0, 2_000), (35_000, 37_000)]);
        let total = Millis(60_000);

        let plans = segmenter.plan(&captions, total).unwrap();
        assert_covers(&plans, total);
        assert!(plans.iter().all(|p| p.duration() <= Millis(10_000)));
        assert_eq!(plans[0].end.offset(), Millis(2_000));
    }

    #[test]
    fn test_overlapping_cues_are_never_split() {
        let segmenter = Segmenter::new(Millis(10_000)).unwrap();
        // The second cue overlaps both neighbours, so 6s and 9s are not cut points.
        let captions = track(&[(0, 6_000), (5_000, 12_000), (9_000, 13_000), (14_000, 18_000)]);
        let total = Millis(20_000);

        let plans = segmenter.plan(&captions, total).unwrap();
        assert_covers(&plans, total);
        for plan in &plans[..plans.len() - 1] {
            let cut = plan.end.offset();
            assert!(!captions.cues().iter().any(|c| c.start < cut && cut < c.end));
        }
    }

    #[test]
    fn test_trailing_uncaptioned_media() {
        let segmenter = Segmenter::new(Millis(10_000)).unwrap();
        let captions = track(&[(0, 4_000), (5_000, 9_000)]);
        let total = Millis(35_000);

        let plans = segmenter.plan(&captions, total).unwrap();
        assert_covers(&plans, total);
        assert_eq!(plans[0].end.offset(), Millis(9_000));
        assert!(plans.iter().all(|p| p.duration() <= Millis(10_000)));
    }

    #[test]
    fn test_coverage_across_many_shapes() {
        let segmenter = Segmenter::new(Millis(7_000)).unwrap();
        let shapes: Vec<Vec<(u64, u64)>> = vec![
            vec![(0, 1_000)],
            vec![(500, 20_000)],
            vec![(0, 3_000), (3_000, 6_000), (6_000, 9_000), (9_000, 12_000)],
            vec![(1_000, 2_000), (15_000, 16_000), (30_000, 45_000)],
            vec![(0, 50_000), (2_000, 3_000)],
        ];

        for spans in shapes {
            let captions = track(&spans);
            for total in [Millis(7_000), Millis(7_001), Millis(33_333), Millis(50_000)] {
                let plans = segmenter.plan(&captions, total).unwrap();
                assert_covers(&plans, total);
            }
        }
    }

    #[test]
    fn test_build_zero_bases_captions() {
        let segmenter = Segmenter::new(Millis(10_000)).unwrap();
        let captions = track(&[(0, 4_000), (5_000, 9_000), (10_000, 14_000), (15_000, 19_000)]);
        let total = Millis(20_000);

        let plans = segmenter.plan(&captions, total).unwrap();
        let segments = segmenter
            .build(&plans, &captions, |p| PathBuf::from(format!("part_{:02}.mp4", p.index)))
            .unwrap();

        assert_eq!(segments.len(), 2);
        let second = &segments[1];
        assert_eq!(second.offset.offset(), Millis(9_000));
        assert_eq!(second.captions.cues()[0].start, Millis(1_000));
        assert!(second.captions.cues().iter().all(|c| c.end <= second.duration));
        assert_eq!(second.media, PathBuf::from("part_01.mp4"));
    }

    #[test]
    fn test_local_absolute_conversion() {
        let segment = Segment {
            index: 1,
            media: PathBuf::from("part_01.mp4"),
            offset: SourceTime::from_millis(60_000),
            duration: Millis(30_000),
            captions: CaptionTrack::new(),
        };

        let local = SegmentTime::from_millis(5_000);
        let absolute = segment.to_absolute(local);
        assert_eq!(absolute, SourceTime::from_millis(65_000));
        assert_eq!(segment.to_local(absolute).unwrap(), local);
        assert!(segment.to_local(SourceTime::from_millis(90_000)).is_ok());
        assert!(matches!(
            segment.to_local(SourceTime::from_millis(59_999)),
            Err(KlippError::TimingOutOfBounds(_))
        ));
        assert!(matches!(
            segment.to_local(SourceTime::from_millis(90_001)),
            Err(KlippError::TimingOutOfBounds(_))
        ));
    }

    #[test]
    fn test_verify_plan_detects_gap() {
        let plans = vec![
            SegmentPlan { index: 0, start: SourceTime::ORIGIN, end: SourceTime::from_millis(1_000) },
            SegmentPlan { index: 1, start: SourceTime::from_millis(1_500), end: SourceTime::from_millis(3_000) },
        ];
        let err = verify_plan(&plans, &CaptionTrack::new(), Millis(3_000)).unwrap_err();
        assert!(matches!(err, KlippError::InvariantViolation(_)));
    }
}
