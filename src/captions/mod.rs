//! Caption tracks: ordered timed text cues.
//!
//! A track is never edited in place. [`CaptionTrack::shift`] and
//! [`CaptionTrack::subrange`] return new tracks, which is how segment and clip
//! tracks are derived from the full source track.

mod format;

pub use format::{parse_srt, parse_vtt, CaptionFormat};

use crate::error::{KlippError, Result};
use crate::timing::{format_clock, Millis};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One timed caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionCue {
    /// Index as it appeared in the source file. Not guaranteed unique.
    pub index: u32,
    pub start: Millis,
    pub end: Millis,
    pub text: String,
}

impl CaptionCue {
    pub fn new(index: u32, start: Millis, end: Millis, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into(),
        }
    }

    pub fn duration(&self) -> Millis {
        self.end.saturating_sub(self.start)
    }

    /// Whether the cue overlaps the half-open window `[start, end)`.
    pub fn overlaps(&self, start: Millis, end: Millis) -> bool {
        self.start < end && self.end > start
    }
}

/// Ordered sequence of caption cues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionTrack {
    cues: Vec<CaptionCue>,
}

impl CaptionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a track from arbitrary cues.
    ///
    /// Cues with `start >= end` are dropped; the rest are ordered by start time
    /// (stable, so equal starts keep their input order). Overlaps are kept.
    pub fn from_cues(cues: impl IntoIterator<Item = CaptionCue>) -> Self {
        let mut cues: Vec<CaptionCue> = cues.into_iter().filter(|c| c.start < c.end).collect();
        cues.sort_by_key(|c| c.start);
        Self { cues }
    }

    /// Load a track from an SRT or WebVTT file, picking the parser by extension
    /// and falling back to sniffing the content. Invalid UTF-8 is replaced
    /// rather than rejecting the file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        let format = CaptionFormat::from_path(path).unwrap_or_else(|| CaptionFormat::sniff(&content));
        Ok(format.parse(&content))
    }

    pub fn cues(&self) -> &[CaptionCue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Latest cue end time, or zero for an empty track.
    pub fn end(&self) -> Millis {
        self.cues.iter().map(|c| c.end).max().unwrap_or(Millis::ZERO)
    }

    /// Shift every cue by `delta` milliseconds.
    ///
    /// Fails with [`KlippError::MalformedTiming`] if any cue would start before zero.
    pub fn shift(&self, delta: i64) -> Result<CaptionTrack> {
        let mut shifted = Vec::with_capacity(self.cues.len());
        for cue in &self.cues {
            let start = cue.start.checked_add_signed(delta).ok_or_else(|| {
                KlippError::MalformedTiming(format!(
                    "shifting cue {} at {} by {}ms would start before zero",
                    cue.index, cue.start, delta
                ))
            })?;
            let end = cue.end.checked_add_signed(delta).ok_or_else(|| {
                KlippError::MalformedTiming(format!(
                    "shifting cue {} ending at {} by {}ms would end before zero",
                    cue.index, cue.end, delta
                ))
            })?;
            shifted.push(CaptionCue {
                start,
                end,
                ..cue.clone()
            });
        }
        Ok(CaptionTrack { cues: shifted })
    }

    /// Cues overlapping `[start, end)`, clipped to that window.
    ///
    /// Times stay in the same coordinates as `self`; callers zero-base the
    /// result with [`shift`](Self::shift). Clipping never extends a cue.
    pub fn subrange(&self, start: Millis, end: Millis) -> CaptionTrack {
        let cues = self
            .cues
            .iter()
            .filter(|c| c.overlaps(start, end))
            .map(|c| CaptionCue {
                start: c.start.max(start),
                end: c.end.min(end),
                ..c.clone()
            })
            .collect();
        CaptionTrack { cues }
    }

    /// All cue text joined with spaces.
    pub fn text(&self) -> String {
        self.cues
            .iter()
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One `[MM:SS] text` line per cue, for prompts.
    pub fn format_with_timestamps(&self) -> String {
        self.cues
            .iter()
            .map(|c| format!("[{}] {}", format_clock(c.start), c.text.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_srt(&self) -> String {
        format::to_srt(self)
    }

    pub fn to_vtt(&self) -> String {
        format::to_vtt(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(spans: &[(u64, u64)]) -> CaptionTrack {
        CaptionTrack::from_cues(
            spans
                .iter()
                .enumerate()
                .map(|(i, (s, e))| CaptionCue::new(i as u32 + 1, Millis(*s), Millis(*e), format!("cue {}", i + 1))),
        )
    }

    #[test]
    fn test_load_tolerates_invalid_utf8_in_one_cue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captions.srt");
        let mut body = b"1\n00:00:01,000 --> 00:00:02,000\nfirst\n\n2\n00:00:03,000 --> 00:00:04,000\nbad ".to_vec();
        body.extend_from_slice(&[0xff, 0xfe]);
        body.extend_from_slice(b"\n\n3\n00:00:05,000 --> 00:00:06,000\nthird\n");
        std::fs::write(&path, body).unwrap();

        let track = CaptionTrack::load(&path).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.cues()[0].text, "first");
        assert!(track.cues()[1].text.starts_with("bad"));
        assert_eq!(track.cues()[2].text, "third");
    }

    #[test]
    fn test_from_cues_orders_and_drops_empty() {
        let t = CaptionTrack::from_cues(vec![
            CaptionCue::new(2, Millis(5000), Millis(6000), "b"),
            CaptionCue::new(1, Millis(1000), Millis(2000), "a"),
            CaptionCue::new(3, Millis(7000), Millis(7000), "zero"),
        ]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.cues()[0].text, "a");
        assert_eq!(t.end(), Millis(6000));
    }

    #[test]
    fn test_shift_rejects_negative_start() {
        let t = track(&[(1000, 2000), (3000, 4000)]);
        assert!(matches!(t.shift(-1500), Err(KlippError::MalformedTiming(_))));

        let shifted = t.shift(-1000).unwrap();
        assert_eq!(shifted.cues()[0].start, Millis::ZERO);
        assert_eq!(shifted.cues()[1].end, Millis(3000));
        // Original untouched.
        assert_eq!(t.cues()[0].start, Millis(1000));
    }

    #[test]
    fn test_subrange_clips_and_drops() {
        let t = track(&[(0, 1000), (1500, 3000), (3000, 5000), (6000, 7000)]);
        let sub = t.subrange(Millis(2000), Millis(6000));

        assert_eq!(sub.len(), 2);
        assert_eq!(sub.cues()[0].start, Millis(2000));
        assert_eq!(sub.cues()[0].end, Millis(3000));
        assert_eq!(sub.cues()[1].start, Millis(3000));
        assert_eq!(sub.cues()[1].end, Millis(5000));
    }

    #[test]
    fn test_subrange_then_shift_round_trips() {
        let t = track(&[(10_000, 12_000), (12_500, 15_000), (16_000, 18_000)]);
        let window_start = Millis(12_000);
        let original = t.subrange(window_start, Millis(17_000));
        let zeroed = original.shift(-window_start.as_signed()).unwrap();

        assert_eq!(zeroed.cues()[0].start, Millis(500));
        assert_eq!(zeroed.shift(window_start.as_signed()).unwrap(), original);
    }

    #[test]
    fn test_empty_window() {
        let t = track(&[(0, 1000)]);
        assert!(t.subrange(Millis(500), Millis(500)).is_empty());
    }

    #[test]
    fn test_format_with_timestamps() {
        let t = track(&[(61_000, 62_000)]);
        assert_eq!(t.format_with_timestamps(), "[01:01] cue 1");
    }
}
