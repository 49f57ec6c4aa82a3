//! Pipeline state machine.
//!
//! Stages run strictly in order: download, caption, segment, analyze,
//! aggregate, synthesize-clips, render-titles, generate-covers. Each stage
//! persists an artifact under the run directory and records its status in a
//! [`PipelineState`] keyed by source. The [`StageRunner`] turns that into
//! resumable run-or-load execution.

pub mod artifacts;
mod runner;
mod state;
mod store;

pub use artifacts::{Artifact, CaptionArtifact, Provenance, RunLayout, SegmentsArtifact};
pub use runner::{Produced, StageRunner};
pub use state::{PipelineState, RunPhase, Stage, StageRecord, StageReport, StageStatus, Unit};
pub use store::{RunSummary, SqliteStateStore};
