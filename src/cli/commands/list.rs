//! List command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::SqliteStateStore;
use anyhow::Result;
use console::style;

/// Run the list command.
pub fn run_list(settings: Settings) -> Result<()> {
    let db_path = settings.state_db_path();
    if !db_path.exists() {
        Output::info("No runs recorded yet. Use 'klipp run <input>' to start one.");
        return Ok(());
    }

    let store = SqliteStateStore::new(&db_path)?;
    let runs = match store.list() {
        Ok(runs) => runs,
        Err(e) => {
            Output::error(&format!("Failed to list runs: {}", e));
            return Err(e.into());
        }
    };

    if runs.is_empty() {
        Output::info("No runs recorded yet. Use 'klipp run <input>' to start one.");
        return Ok(());
    }

    Output::header(&format!("Runs ({})", runs.len()));
    println!();

    for run in &runs {
        println!(
            "  {} {} ({}, {})",
            style("*").cyan(),
            style(&run.source_key).bold(),
            run.state.phase(),
            style(run.updated_at.format("%Y-%m-%d %H:%M")).dim()
        );
        println!("    {}", style(&run.origin).dim());
    }

    let complete = runs.iter().filter(|r| r.state.complete).count();
    println!();
    Output::kv("Total runs", &runs.len().to_string());
    Output::kv("Complete", &complete.to_string());

    Ok(())
}
