//! Millisecond time values and coordinate spaces.
//!
//! A highlight's timing can be expressed relative to three origins: the start
//! of the source media, the start of the segment it came from, or the start of
//! the synthesized clip. [`Timestamp`] carries its space in the type so that
//! moving between spaces always goes through an explicit conversion
//! ([`crate::segmenting::Segment::to_local`] and friends).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Add;

/// A non-negative span of time with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Millis(pub u64);

impl Millis {
    pub const ZERO: Millis = Millis(0);

    pub fn from_secs(secs: u64) -> Self {
        Millis(secs.saturating_mul(1000))
    }

    pub fn from_mins(mins: u64) -> Self {
        Millis::from_secs(mins.saturating_mul(60))
    }

    /// Convert fractional seconds, rounding to the nearest millisecond.
    /// Negative and non-finite inputs clamp to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Millis::ZERO;
        }
        Millis((secs * 1000.0).round() as u64)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add a signed offset, returning `None` if the result would be negative.
    pub fn checked_add_signed(self, delta: i64) -> Option<Millis> {
        self.0.checked_add_signed(delta).map(Millis)
    }

    pub fn checked_sub(self, other: Millis) -> Option<Millis> {
        self.0.checked_sub(other.0).map(Millis)
    }

    pub fn saturating_sub(self, other: Millis) -> Millis {
        Millis(self.0.saturating_sub(other.0))
    }

    pub fn abs_diff(self, other: Millis) -> Millis {
        Millis(self.0.abs_diff(other.0))
    }

    /// Signed value, for use as a shift delta.
    pub fn as_signed(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl Add for Millis {
    type Output = Millis;

    fn add(self, rhs: Millis) -> Millis {
        Millis(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hms(*self, '.'))
    }
}

/// Marker for a time coordinate space.
pub trait TimeSpace: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Time measured from the start of the source media.
#[derive(Debug)]
pub enum Source {}

/// Time measured from the start of one segment.
#[derive(Debug)]
pub enum Segment {}

/// Time measured from the start of one clip.
#[derive(Debug)]
pub enum Clip {}

impl TimeSpace for Source {
    const NAME: &'static str = "source";
}

impl TimeSpace for Segment {
    const NAME: &'static str = "segment";
}

impl TimeSpace for Clip {
    const NAME: &'static str = "clip";
}

/// A point in time within coordinate space `S`.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Timestamp<S: TimeSpace> {
    offset: Millis,
    #[serde(skip)]
    space: PhantomData<fn() -> S>,
}

pub type SourceTime = Timestamp<Source>;
pub type SegmentTime = Timestamp<Segment>;
pub type ClipTime = Timestamp<Clip>;

impl<S: TimeSpace> Timestamp<S> {
    pub const ORIGIN: Timestamp<S> = Timestamp {
        offset: Millis::ZERO,
        space: PhantomData,
    };

    pub fn new(offset: Millis) -> Self {
        Self {
            offset,
            space: PhantomData,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Millis(ms))
    }

    /// Distance from the origin of this space.
    pub fn offset(self) -> Millis {
        self.offset
    }

    pub fn as_secs_f64(self) -> f64 {
        self.offset.as_secs_f64()
    }

    /// Time elapsed since `earlier`, or `None` if `earlier` is later than `self`.
    pub fn since(self, earlier: Timestamp<S>) -> Option<Millis> {
        self.offset.checked_sub(earlier.offset)
    }
}

impl<S: TimeSpace> Add<Millis> for Timestamp<S> {
    type Output = Timestamp<S>;

    fn add(self, rhs: Millis) -> Timestamp<S> {
        Timestamp::new(self.offset + rhs)
    }
}

impl<S: TimeSpace> Clone for Timestamp<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: TimeSpace> Copy for Timestamp<S> {}

impl<S: TimeSpace> PartialEq for Timestamp<S> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<S: TimeSpace> Eq for Timestamp<S> {}

impl<S: TimeSpace> PartialOrd for Timestamp<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: TimeSpace> Ord for Timestamp<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset.cmp(&other.offset)
    }
}

impl<S: TimeSpace> Hash for Timestamp<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
    }
}

impl<S: TimeSpace> fmt::Debug for Timestamp<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", S::NAME, self.offset)
    }
}

impl<S: TimeSpace> fmt::Display for Timestamp<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.offset, f)
    }
}

/// Parse a timestamp such as `01:02:03,456`, `01:02:03.456`, `02:03`, `123.5` or `45`.
///
/// Fractions are read digit-wise so `00:00:01,001` is exactly 1001ms.
pub fn parse_timestamp(input: &str) -> Option<Millis> {
    let normalized = input.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }

    let parts: Vec<&str> = normalized.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let (whole_parts, seconds_part) = parts.split_at(parts.len() - 1);
    let mut total_secs: u64 = 0;
    for part in whole_parts {
        let value: u64 = part.trim().parse().ok()?;
        total_secs = total_secs.checked_mul(60)?.checked_add(value)?;
    }

    let seconds_part = seconds_part[0].trim();
    let (secs_str, frac_str) = match seconds_part.split_once('.') {
        Some((s, f)) => (s, f),
        None => (seconds_part, ""),
    };

    let secs: u64 = if secs_str.is_empty() { 0 } else { secs_str.parse().ok()? };
    if !whole_parts.is_empty() && secs >= 60 {
        return None;
    }
    if !frac_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut millis: u64 = 0;
    for (i, digit) in frac_str.chars().take(3).enumerate() {
        let d = digit.to_digit(10)? as u64;
        millis += d * 10u64.pow(2 - i as u32);
    }

    total_secs = total_secs.checked_mul(60)?.checked_add(secs)?;

    total_secs.checked_mul(1000)?.checked_add(millis).map(Millis)
}

/// Format as `HH:MM:SS<sep>mmm` (SRT uses `,`, WebVTT uses `.`).
pub fn format_hms(ms: Millis, sep: char) -> String {
    let total = ms.0;
    let hours = total / 3_600_000;
    let minutes = (total % 3_600_000) / 60_000;
    let secs = (total % 60_000) / 1000;
    let millis = total % 1000;
    format!("{:02}:{:02}:{:02}{}{:03}", hours, minutes, secs, sep, millis)
}

/// Format as `MM:SS`, or `HH:MM:SS` past the first hour.
pub fn format_clock(ms: Millis) -> String {
    let total_seconds = ms.0 / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("00:00:01,001"), Some(Millis(1001)));
        assert_eq!(parse_timestamp("01:02:03.456"), Some(Millis(3_723_456)));
        assert_eq!(parse_timestamp("02:03"), Some(Millis(123_000)));
        assert_eq!(parse_timestamp("02:03.5"), Some(Millis(123_500)));
        assert_eq!(parse_timestamp("45"), Some(Millis(45_000)));
        assert_eq!(parse_timestamp("90.25"), Some(Millis(90_250)));
        assert_eq!(parse_timestamp(" 00:10:00,000 "), Some(Millis(600_000)));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("abc"), None);
        assert_eq!(parse_timestamp("1:2:3:4"), None);
        assert_eq!(parse_timestamp("00:61"), None);
        assert_eq!(parse_timestamp("-5"), None);
        assert_eq!(parse_timestamp("00:00:01,0x1"), None);
    }

    #[test]
    fn test_format_round_trip() {
        let ms = Millis(3_723_456);
        assert_eq!(format_hms(ms, ','), "01:02:03,456");
        assert_eq!(parse_timestamp(&format_hms(ms, ',')), Some(ms));
        assert_eq!(format_clock(Millis(83_999)), "01:23");
        assert_eq!(format_clock(Millis(3_723_000)), "01:02:03");
    }

    #[test]
    fn test_signed_add() {
        assert_eq!(Millis(500).checked_add_signed(-500), Some(Millis::ZERO));
        assert_eq!(Millis(500).checked_add_signed(-501), None);
        assert_eq!(Millis(500).checked_add_signed(250), Some(Millis(750)));
    }

    #[test]
    fn test_timestamp_serializes_as_plain_millis() {
        let t = SourceTime::from_millis(1500);
        assert_eq!(serde_json::to_string(&t).unwrap(), "1500");
        let back: SourceTime = serde_json::from_str("1500").unwrap();
        assert_eq!(back, t);
        assert_eq!(format!("{:?}", t), "source@00:00:01.500");
    }

    #[test]
    fn test_since() {
        let a = SegmentTime::from_millis(1000);
        let b = SegmentTime::from_millis(4000);
        assert_eq!(b.since(a), Some(Millis(3000)));
        assert_eq!(a.since(b), None);
    }
}
