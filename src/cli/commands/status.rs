//! Status command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::media_source::parse_input;
use crate::orchestrator::recorded_state;
use crate::pipeline::{PipelineState, SqliteStateStore, Stage, StageReport};
use anyhow::Result;

/// Run the status command.
pub fn run_status(input: &str, settings: Settings) -> Result<()> {
    let key = parse_input(input, &settings.download)
        .map(|(source, id)| source.source_key(&id))
        .unwrap_or_else(|_| input.to_string());
    let store = SqliteStateStore::new(&settings.state_db_path())?;

    match recorded_state(&settings.runs_dir(), &store, &key)? {
        Some(state) => print_state(&state),
        None => {
            Output::info(&format!(
                "No run recorded for '{}'. Start one with 'klipp run <input>'.",
                input
            ));
        }
    }

    Ok(())
}

fn print_state(state: &PipelineState) {
    Output::header(&state.source_key);
    Output::kv("Origin", &state.origin);
    Output::kv("Phase", &state.phase().to_string());
    println!();

    for stage in Stage::ALL {
        Output::stage_report(&stage_line(state, stage));
    }
}

/// Report line for a stage, built from its persisted record.
fn stage_line(state: &PipelineState, stage: Stage) -> StageReport {
    let mut report = StageReport::new(stage, state.status(stage));
    if let Some(record) = state.record(stage) {
        report.affected = record.affected.clone();
        report.note = record.note.clone();
        if let Some(at) = record.updated_at {
            let when = at.format("%Y-%m-%d %H:%M:%S").to_string();
            report.note = Some(match report.note {
                Some(note) => format!("{}, {}", note, when),
                None => when,
            });
        }
    }
    report
}
