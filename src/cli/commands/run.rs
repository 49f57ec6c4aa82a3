//! Run command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::{Output, RunArgs};
use crate::config::Settings;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::pipeline::RunPhase;
use anyhow::Result;

/// Build run options from settings with command-line overrides applied.
fn run_options(args: &RunArgs, settings: &Settings) -> Result<RunOptions> {
    let mut options = RunOptions::from_settings(settings)?;

    options.skip.extend(args.skip.iter().copied());
    options.force_transcribe |= args.force_transcribe;
    options.clips &= !args.no_clips;
    options.titles &= !args.no_titles;
    options.covers &= !args.no_covers;

    if let Some(style) = args.style {
        options.style = style;
    }
    if let Some(k) = args.max_clips {
        if k == 0 {
            anyhow::bail!("--max-clips must be at least 1");
        }
        options.max_clips = k;
    }
    if let Some(minutes) = args.segment_minutes {
        options.segment_minutes = minutes;
    }
    if let Some(path) = &args.background {
        options.background = Some(Settings::expand_path(path));
    }
    if let Some(language) = &args.language {
        options.language = language.clone();
    }
    if let Some(mode) = args.aggregation {
        options.aggregation = mode;
    }

    Ok(options)
}

/// Run the run command.
pub async fn run_pipeline(args: &RunArgs, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Run, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'klipp doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let options = run_options(args, &settings)?;
    Output::info(&format!("Processing: {}", args.input));

    let orchestrator = Orchestrator::new(settings)?;

    let result = match orchestrator.run(&args.input, &options).await {
        Ok(result) => result,
        Err(e) => {
            Output::error(&format!("Run failed: {}", e));
            if let Ok(Some(state)) = orchestrator.state_for(&args.input) {
                if let RunPhase::Failed(stage) = state.phase() {
                    Output::info(&format!(
                        "Fix the cause and run again to resume from '{}'.",
                        stage
                    ));
                }
            }
            return Err(e.into());
        }
    };

    Output::header(&format!("{} ({})", result.source.title, result.source.key));
    for report in &result.reports {
        Output::stage_report(report);
    }

    Output::header(&format!("Highlights ({})", result.highlights.highlights.len()));
    if result.highlights.highlights.is_empty() {
        Output::warning("No highlights were found.");
    }
    for highlight in &result.highlights.highlights {
        Output::highlight(highlight);
    }
    if !result.highlights.honorable_mentions.is_empty() {
        println!();
        Output::kv(
            "Honorable mentions",
            &result.highlights.honorable_mentions.len().to_string(),
        );
    }

    if let Some(batch) = &result.clips {
        let failed = batch.failed_ranks();
        println!();
        Output::kv("Clips", &batch.clips().count().to_string());
        if !failed.is_empty() {
            Output::warning(&format!("{} clip(s) failed: {:?}", failed.len(), failed));
        }
    }

    println!();
    Output::success(&format!("Artifacts in {}", result.run_dir.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::config::AggregationMode;
    use crate::pipeline::Stage;
    use crate::render::TitleStyle;
    use clap::Parser;

    fn args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["klipp", "run"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Run(args) => args,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_defaults_come_from_settings() {
        let mut settings = Settings::default();
        settings.render.style = "neon_glow".to_string();
        settings.aggregation.max_clips = 7;

        let options = run_options(&args(&["talk.mp4"]), &settings).unwrap();
        assert_eq!(options.style, TitleStyle::NeonGlow);
        assert_eq!(options.max_clips, 7);
        assert!(options.clips && options.titles && options.covers);
        assert!(options.skip.is_empty());
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings::default();
        let options = run_options(
            &args(&[
                "talk.mp4",
                "--skip",
                "segment",
                "--no-titles",
                "--max-clips",
                "2",
                "--segment-minutes",
                "10",
                "--language",
                "zh",
                "--aggregation",
                "service",
            ]),
            &settings,
        )
        .unwrap();

        assert!(options.skip.contains(&Stage::Segment));
        assert!(!options.titles && options.covers);
        assert_eq!(options.max_clips, 2);
        assert_eq!(options.segment_minutes, 10.0);
        assert_eq!(options.language, "zh");
        assert_eq!(options.aggregation, AggregationMode::Service);
    }

    #[test]
    fn test_zero_max_clips_is_rejected() {
        assert!(run_options(&args(&["talk.mp4", "--max-clips", "0"]), &Settings::default()).is_err());
    }
}
