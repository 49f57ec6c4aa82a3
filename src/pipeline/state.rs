//! Persisted per-run stage state.

use crate::error::KlippError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Download,
    Caption,
    Segment,
    Analyze,
    Aggregate,
    SynthesizeClips,
    RenderTitles,
    GenerateCovers,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Download,
        Stage::Caption,
        Stage::Segment,
        Stage::Analyze,
        Stage::Aggregate,
        Stage::SynthesizeClips,
        Stage::RenderTitles,
        Stage::GenerateCovers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Caption => "caption",
            Stage::Segment => "segment",
            Stage::Analyze => "analyze",
            Stage::Aggregate => "aggregate",
            Stage::SynthesizeClips => "synthesize-clips",
            Stage::RenderTitles => "render-titles",
            Stage::GenerateCovers => "generate-covers",
        }
    }

    /// Progressive form used when describing a run in progress.
    pub fn activity(&self) -> &'static str {
        match self {
            Stage::Download => "downloading",
            Stage::Caption => "captioning",
            Stage::Segment => "segmenting",
            Stage::Analyze => "analyzing",
            Stage::Aggregate => "aggregating",
            Stage::SynthesizeClips => "synthesizing-clips",
            Stage::RenderTitles => "rendering-titles",
            Stage::GenerateCovers => "generating-covers",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = KlippError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| KlippError::InvalidInput(format!("unknown stage: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Done,
    Skipped,
    Failed,
}

impl StageStatus {
    /// Done and skipped stages are never executed again.
    pub fn is_settled(&self) -> bool {
        matches!(self, StageStatus::Done | StageStatus::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Done => "done",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A sub-unit a stage result refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Unit {
    Segment(usize),
    Highlight(usize),
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Segment(i) => write!(f, "segment {}", i),
            Unit::Highlight(rank) => write!(f, "highlight #{}", rank),
        }
    }
}

/// Outcome of one stage execution, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    /// Units that degraded without failing the stage.
    pub affected: Vec<Unit>,
    pub note: Option<String>,
}

impl StageReport {
    pub fn new(stage: Stage, status: StageStatus) -> Self {
        Self {
            stage,
            status,
            affected: Vec::new(),
            note: None,
        }
    }

    pub fn with_affected(mut self, affected: Vec<Unit>) -> Self {
        self.affected = affected;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Persisted record for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected: Vec<Unit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    /// Next stage to run.
    At(Stage),
    Failed(Stage),
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::NotStarted => f.write_str("not-started"),
            RunPhase::At(stage) => f.write_str(stage.activity()),
            RunPhase::Failed(stage) => write!(f, "failed ({})", stage),
            RunPhase::Complete => f.write_str("complete"),
        }
    }
}

/// Stage progress for one source, keyed by its source key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub source_key: String,
    pub origin: String,
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageRecord>,
    /// Set once the last enabled stage has settled.
    #[serde(default)]
    pub complete: bool,
}

impl PipelineState {
    pub fn new(source_key: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            origin: origin.into(),
            stages: BTreeMap::new(),
            complete: false,
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stages.get(&stage).map(|r| r.status).unwrap_or_default()
    }

    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    /// Record a stage result, stamping it with the current time.
    pub fn mark(&mut self, report: &StageReport) {
        self.stages.insert(
            report.stage,
            StageRecord {
                status: report.status,
                affected: report.affected.clone(),
                note: report.note.clone(),
                updated_at: Some(Utc::now()),
            },
        );
        if report.status == StageStatus::Failed {
            self.complete = false;
        }
    }

    pub fn phase(&self) -> RunPhase {
        if let Some(stage) = Stage::ALL.into_iter().find(|s| self.status(*s) == StageStatus::Failed) {
            return RunPhase::Failed(stage);
        }
        if self.complete {
            return RunPhase::Complete;
        }
        if self.stages.is_empty() {
            return RunPhase::NotStarted;
        }
        Stage::ALL
            .into_iter()
            .find(|s| !self.status(*s).is_settled())
            .map(RunPhase::At)
            .unwrap_or(RunPhase::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::SynthesizeClips.to_string(), "synthesize-clips");
        assert_eq!("render_titles".parse::<Stage>().unwrap(), Stage::RenderTitles);
        assert!("publish".parse::<Stage>().is_err());
        assert_eq!(serde_json::to_string(&Stage::GenerateCovers).unwrap(), "\"generate-covers\"");
    }

    #[test]
    fn test_phase_progression() {
        let mut state = PipelineState::new("yt_abc", "https://youtu.be/abc");
        assert_eq!(state.phase(), RunPhase::NotStarted);

        state.mark(&StageReport::new(Stage::Download, StageStatus::Done));
        state.mark(&StageReport::new(Stage::Caption, StageStatus::Skipped));
        assert_eq!(state.phase(), RunPhase::At(Stage::Segment));
        assert_eq!(state.phase().to_string(), "segmenting");

        state.mark(&StageReport::new(Stage::Segment, StageStatus::Failed));
        assert_eq!(state.phase(), RunPhase::Failed(Stage::Segment));

        for stage in Stage::ALL {
            state.mark(&StageReport::new(stage, StageStatus::Done));
        }
        state.complete = true;
        assert_eq!(state.phase(), RunPhase::Complete);
    }

    #[test]
    fn test_state_json_round_trip() {
        let mut state = PipelineState::new("local_0123456789abcdef", "/videos/talk.mp4");
        state.mark(
            &StageReport::new(Stage::Analyze, StageStatus::Done)
                .with_affected(vec![Unit::Segment(2)])
                .with_note("1 segment failed"),
        );

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"analyze\""));
        assert!(json.contains("{\"kind\":\"segment\",\"id\":2}"));
        let back: PipelineState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
