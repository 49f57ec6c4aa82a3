//! CLI output formatting utilities.

use crate::aggregation::AggregatedHighlight;
use crate::pipeline::{StageReport, StageStatus};
use crate::timing::Millis;
use console::style;

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print one stage line with its degraded units.
    pub fn stage_report(report: &StageReport) {
        let status = match report.status {
            StageStatus::Done => style(report.status.to_string()).green(),
            StageStatus::Skipped => style(report.status.to_string()).cyan(),
            StageStatus::Pending => style(report.status.to_string()).dim(),
            StageStatus::Failed => style(report.status.to_string()).red(),
        };

        print!("  {:<18} {}", report.stage.as_str(), status);
        if let Some(note) = &report.note {
            print!(" {}", style(format!("({})", note)).dim());
        }
        println!();

        if !report.affected.is_empty() {
            let units: Vec<String> = report.affected.iter().map(|u| u.to_string()).collect();
            println!("    {} degraded: {}", style("!").yellow(), units.join(", "));
        }
    }

    /// Print a ranked highlight.
    pub fn highlight(highlight: &AggregatedHighlight) {
        println!(
            "  {} {} [{} - {}, {}] {}",
            style(format!("#{}", highlight.rank)).green().bold(),
            style(&highlight.title).bold(),
            highlight.absolute_start.offset(),
            highlight.absolute_end.offset(),
            format_duration(highlight.duration()),
            style(highlight.score_tier).dim(),
        );
    }
}

/// Format a duration as a short human-readable string.
pub fn format_duration(duration: Millis) -> String {
    let total_seconds = duration.as_millis() / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Millis(45_900)), "45s");
        assert_eq!(format_duration(Millis::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Millis::from_mins(61)), "1h 1m 0s");
    }
}
