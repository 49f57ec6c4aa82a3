//! SubRip and WebVTT parsing and serialization.
//!
//! Source captions are untrusted: a cue whose timing line cannot be read is
//! skipped and parsing continues with the next one.

use super::{CaptionCue, CaptionTrack};
use crate::timing::{format_hms, parse_timestamp, Millis};
use std::path::Path;
use tracing::debug;

/// Supported caption formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionFormat {
    Srt,
    Vtt,
}

impl std::str::FromStr for CaptionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "srt" => Ok(CaptionFormat::Srt),
            "vtt" | "webvtt" => Ok(CaptionFormat::Vtt),
            _ => Err(format!("Unknown caption format: {}. Use srt or vtt.", s)),
        }
    }
}

impl CaptionFormat {
    /// Guess from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }

    /// Guess from file content.
    pub fn sniff(content: &str) -> Self {
        if content.trim_start_matches('\u{feff}').trim_start().starts_with("WEBVTT") {
            CaptionFormat::Vtt
        } else {
            CaptionFormat::Srt
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            CaptionFormat::Srt => "srt",
            CaptionFormat::Vtt => "vtt",
        }
    }

    pub fn parse(self, content: &str) -> CaptionTrack {
        match self {
            CaptionFormat::Srt => parse_srt(content),
            CaptionFormat::Vtt => parse_vtt(content),
        }
    }

    pub fn serialize(self, track: &CaptionTrack) -> String {
        match self {
            CaptionFormat::Srt => to_srt(track),
            CaptionFormat::Vtt => to_vtt(track),
        }
    }
}

/// Parse SubRip content.
pub fn parse_srt(content: &str) -> CaptionTrack {
    parse_cues(content, false)
}

/// Parse WebVTT content. Inline markup such as `<c>` or `<00:00:01.000>` is stripped.
pub fn parse_vtt(content: &str) -> CaptionTrack {
    parse_cues(content, true)
}

struct PendingCue {
    index: u32,
    start: Millis,
    end: Millis,
    lines: Vec<String>,
}

impl PendingCue {
    fn finish(self, strip_markup: bool) -> CaptionCue {
        let text = self.lines.join("\n");
        let text = if strip_markup { strip_tags(&text) } else { text };
        CaptionCue::new(self.index, self.start, self.end, text)
    }
}

/// Line-oriented parser shared by both formats.
///
/// Blocks are normally separated by blank lines, but a missing separator is
/// tolerated: a numeric line directly above a timing line is read as the next
/// cue's index rather than the previous cue's text.
fn parse_cues(content: &str, strip_markup: bool) -> CaptionTrack {
    let content = content.trim_start_matches('\u{feff}');
    let lines: Vec<&str> = content.lines().collect();

    let mut cues: Vec<CaptionCue> = Vec::new();
    let mut pending: Option<PendingCue> = None;
    let mut accepting_text = false;
    let mut skipped = 0usize;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if line.contains("-->") {
            let previous = if i > 0 { lines[i - 1].trim() } else { "" };
            let index_line = previous.parse::<u32>().ok();

            if let Some(mut cue) = pending.take() {
                if index_line.is_some() && cue.lines.last().map(String::as_str) == Some(previous) {
                    cue.lines.pop();
                }
                cues.push(cue.finish(strip_markup));
            }

            match parse_timing(line) {
                Some((start, end)) => {
                    pending = Some(PendingCue {
                        index: index_line.unwrap_or(cues.len() as u32 + 1),
                        start,
                        end,
                        lines: Vec::new(),
                    });
                    accepting_text = true;
                }
                None => {
                    skipped += 1;
                    accepting_text = false;
                }
            }
            continue;
        }

        if line.is_empty() {
            accepting_text = false;
            continue;
        }

        if accepting_text {
            if let Some(cue) = pending.as_mut() {
                cue.lines.push(line.to_string());
            }
        }
    }

    if let Some(cue) = pending.take() {
        cues.push(cue.finish(strip_markup));
    }

    let parsed = cues.len();
    let track = CaptionTrack::from_cues(cues);
    skipped += parsed - track.len();
    if skipped > 0 {
        debug!("Skipped {} malformed caption cue(s)", skipped);
    }
    track
}

/// Parse `start --> end [settings]`.
fn parse_timing(line: &str) -> Option<(Millis, Millis)> {
    let (left, right) = line.split_once("-->")?;
    let start = parse_timestamp(left.trim())?;
    let end = parse_timestamp(right.split_whitespace().next()?)?;
    Some((start, end))
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

/// Format as SRT. Cues are renumbered from 1.
pub(super) fn to_srt(track: &CaptionTrack) -> String {
    let mut output = String::new();

    for (i, cue) in track.cues().iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_hms(cue.start, ','),
            format_hms(cue.end, ',')
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output
}

/// Format as WebVTT.
pub(super) fn to_vtt(track: &CaptionTrack) -> String {
    let mut output = String::from("WEBVTT\n\n");

    for (i, cue) in track.cues().iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_hms(cue.start, '.'),
            format_hms(cue.end, '.')
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output
}
