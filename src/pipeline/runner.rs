//! Run-or-load stage execution.
//!
//! A stage already marked done or skipped is loaded from its artifact and
//! never executed again. A stage the caller asked to skip is loaded if a
//! valid artifact exists and executed otherwise. Everything else runs, and
//! its artifact and state are persisted before the next stage starts.

use super::artifacts::{self, Artifact, RunLayout};
use super::state::{PipelineState, Stage, StageReport, StageStatus, Unit};
use super::store::SqliteStateStore;
use crate::error::Result;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use tracing::{info, instrument, warn};

impl Artifact for PipelineState {}

/// What a stage produced when it actually ran.
#[derive(Debug, Clone)]
pub struct Produced<T> {
    pub value: T,
    pub affected: Vec<Unit>,
    pub note: Option<String>,
}

impl<T> Produced<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
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

/// Drives stages for one run and owns its [`PipelineState`].
pub struct StageRunner<'a> {
    layout: &'a RunLayout,
    store: Option<&'a SqliteStateStore>,
    state: PipelineState,
    skip: BTreeSet<Stage>,
    reports: Vec<StageReport>,
}

impl<'a> StageRunner<'a> {
    /// Resume from `state.json` (or the run index) if present, otherwise start fresh.
    pub fn open(
        layout: &'a RunLayout,
        store: Option<&'a SqliteStateStore>,
        source_key: &str,
        origin: &str,
        skip: BTreeSet<Stage>,
    ) -> Result<Self> {
        layout.create()?;

        let state = match artifacts::load_valid::<PipelineState>(&layout.state()) {
            Some(state) if state.source_key == source_key => state,
            _ => match store.map(|s| s.load(source_key)).transpose()?.flatten() {
                Some(state) => state,
                None => PipelineState::new(source_key, origin),
            },
        };

        Ok(Self {
            layout,
            store,
            state,
            skip,
            reports: Vec::new(),
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn layout(&self) -> &RunLayout {
        self.layout
    }

    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    /// Run `stage` unless a settled or skippable artifact at `path` can be used.
    #[instrument(skip_all, fields(stage = %stage))]
    pub async fn run<T, F, Fut>(&mut self, stage: Stage, path: &Path, execute: F) -> Result<T>
    where
        T: Artifact,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Produced<T>>>,
    {
        let status = self.state.status(stage);

        if status.is_settled() {
            if let Some(value) = artifacts::load_valid::<T>(path) {
                let record = self.state.record(stage).cloned().unwrap_or_default();
                let mut report = StageReport::new(stage, status).with_affected(record.affected);
                report.note = record.note;
                self.reports.push(report);
                return Ok(value);
            }
            warn!("Stage {} was {} but its artifact is missing or invalid, running it again", stage, status);
        } else if self.skip.contains(&stage) {
            if let Some(value) = artifacts::load_valid::<T>(path) {
                info!("Skipping {}: reusing {}", stage, path.display());
                self.settle(StageReport::new(stage, StageStatus::Skipped).with_note("reused existing artifact"))?;
                return Ok(value);
            }
            warn!("Skip requested for {} but no valid artifact exists, running it", stage);
        }

        info!("Running stage {}", stage);
        match execute().await {
            Ok(produced) => {
                artifacts::save(path, &produced.value)?;
                let mut report = StageReport::new(stage, StageStatus::Done).with_affected(produced.affected);
                report.note = produced.note;
                self.settle(report)?;
                Ok(produced.value)
            }
            Err(e) => {
                let report = StageReport::new(stage, StageStatus::Failed).with_note(e.to_string());
                self.settle(report)?;
                Err(e.in_stage(stage.as_str()))
            }
        }
    }

    /// Record a stage that is switched off for this run. Its state is left as is.
    pub fn disabled(&mut self, stage: Stage, reason: &str) {
        let status = self.state.status(stage);
        self.reports.push(StageReport::new(stage, status).with_note(format!("disabled: {}", reason)));
    }

    /// Mark the run complete and persist the final state if it changed.
    pub fn finish(mut self) -> Result<(PipelineState, Vec<StageReport>)> {
        if !self.state.complete {
            self.state.complete = true;
            self.persist()?;
        }
        Ok((self.state, self.reports))
    }

    fn settle(&mut self, report: StageReport) -> Result<()> {
        self.state.mark(&report);
        self.reports.push(report);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        artifacts::save(&self.layout.state(), &self.state)?;
        if let Some(store) = self.store {
            store.save(&self.state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KlippError;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Artifact for Note {
        fn validate(&self) -> Result<()> {
            if self.text.is_empty() {
                return Err(KlippError::InvalidInput("empty".into()));
            }
            Ok(())
        }
    }

    fn note(text: &str) -> Note {
        Note { text: text.to_string() }
    }

    async fn run_counting(runner: &mut StageRunner<'_>, path: &Path, calls: &AtomicUsize, text: &str) -> Result<Note> {
        runner
            .run(Stage::Caption, path, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Produced::new(note(text)))
            })
            .await
    }

    #[tokio::test]
    async fn test_done_stage_is_loaded_not_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path(), "k");
        let path = layout.captions_json();
        let calls = AtomicUsize::new(0);

        {
            let mut runner = StageRunner::open(&layout, None, "k", "o", BTreeSet::new()).unwrap();
            assert_eq!(run_counting(&mut runner, &path, &calls, "first").await.unwrap(), note("first"));
            runner.finish().unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();

        let mut runner = StageRunner::open(&layout, None, "k", "o", BTreeSet::new()).unwrap();
        assert_eq!(run_counting(&mut runner, &path, &calls, "second").await.unwrap(), note("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert_eq!(runner.reports()[0].status, StageStatus::Done);
    }

    #[tokio::test]
    async fn test_corrupt_done_artifact_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path(), "k");
        let path = layout.captions_json();
        let calls = AtomicUsize::new(0);

        let mut runner = StageRunner::open(&layout, None, "k", "o", BTreeSet::new()).unwrap();
        run_counting(&mut runner, &path, &calls, "first").await.unwrap();
        std::fs::write(&path, b"{\"text\": \"\"}").unwrap();

        let mut runner = StageRunner::open(&layout, None, "k", "o", BTreeSet::new()).unwrap();
        assert_eq!(run_counting(&mut runner, &path, &calls, "again").await.unwrap(), note("again"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skip_uses_artifact_or_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path(), "k");
        let path = layout.captions_json();
        let calls = AtomicUsize::new(0);
        let skip: BTreeSet<Stage> = [Stage::Caption].into_iter().collect();

        // No artifact yet: skip falls back to running.
        let mut runner = StageRunner::open(&layout, None, "k", "o", skip.clone()).unwrap();
        run_counting(&mut runner, &path, &calls, "ran").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state().status(Stage::Caption), StageStatus::Done);

        // An artifact from elsewhere with no recorded state: skipped and loaded.
        std::fs::remove_file(layout.state()).unwrap();
        artifacts::save(&path, &note("imported")).unwrap();
        let mut runner = StageRunner::open(&layout, None, "k", "o", skip).unwrap();
        assert_eq!(run_counting(&mut runner, &path, &calls, "unused").await.unwrap(), note("imported"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state().status(Stage::Caption), StageStatus::Skipped);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_attributed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path(), "k");
        let store = SqliteStateStore::in_memory().unwrap();

        let mut runner = StageRunner::open(&layout, Some(&store), "k", "o", BTreeSet::new()).unwrap();
        let err = runner
            .run(Stage::Segment, &layout.segments(), || async {
                Err::<Produced<Note>, _>(KlippError::InvariantViolation("gap".into()))
            })
            .await
            .unwrap_err();

        match err {
            KlippError::StageFailed { stage, .. } => assert_eq!(stage, "segment"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(runner.state().status(Stage::Segment), StageStatus::Failed);
        let stored = store.load("k").unwrap().unwrap();
        assert_eq!(stored.status(Stage::Segment), StageStatus::Failed);
    }
}
