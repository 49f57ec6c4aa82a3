//! Init command - interactive first-run setup.

use super::doctor::{tool_checks, CheckStatus};
use crate::cli::Output;
use crate::config::Settings;
use console::style;
use std::io::{self, Write};
use std::path::Path;

/// Walk a new user through tools, API key, directories and config file.
pub fn run_init(settings: &Settings) -> anyhow::Result<()> {
    Output::header("Klipp Setup");
    println!();
    println!("Klipp cuts the best moments out of long videos. Let's get it ready.\n");

    step(1, "External tools");
    let failing: Vec<_> = tool_checks(settings)
        .into_iter()
        .filter(|c| c.status != CheckStatus::Ok)
        .collect();
    if failing.is_empty() {
        Output::success("yt-dlp and ffmpeg are ready.");
    } else {
        for check in &failing {
            check.print();
        }
        println!();
        if !confirm("Continue without them?")? {
            return cancelled("Install the missing tools");
        }
    }

    step(2, "API key");
    let key_var = &settings.analysis.api_key_env;
    if std::env::var(key_var).map(|k| !k.trim().is_empty()).unwrap_or(false) {
        Output::success(&format!("{} is set.", key_var));
    } else {
        Output::warning(&format!("{} is not set.", key_var));
        println!();
        println!("  Highlight analysis calls an OpenAI-compatible chat model, and videos");
        println!("  without captions are transcribed with the same provider.");
        println!("  Add this to your shell profile:");
        println!("  {}", style(format!("export {}='sk-...'", key_var)).green());
        println!();
        if !confirm("Continue without an API key?")? {
            return cancelled("Export the API key");
        }
    }

    step(3, "Directories");
    for (label, dir) in [
        ("Data", settings.data_dir()),
        ("Runs", settings.runs_dir()),
        ("Temp", settings.temp_dir()),
    ] {
        ensure_dir(label, &dir)?;
    }

    step(4, "Configuration file");
    let config_path = Settings::default_config_path();
    if config_path.exists() {
        Output::info(&format!("Using {}", config_path.display()));
    } else if confirm("Write a default config file?")? {
        settings.save()?;
        Output::success(&format!("Wrote {}", config_path.display()));
        println!(
            "  Tune clip count, segment length and title style with {}",
            style("klipp config edit").green()
        );
    } else {
        Output::info("No config file written; built-in defaults apply.");
    }

    println!();
    println!("{}", style("Ready.").bold().green());
    println!();
    for (command, what) in [
        ("klipp doctor", "check the full setup"),
        ("klipp run <url|file>", "cut highlights from a video"),
        ("klipp status <url|file>", "show where a run stopped"),
        ("klipp list", "list recorded runs"),
    ] {
        println!("  {:<26} {}", style(command).cyan(), what);
    }

    Ok(())
}

fn step(n: u32, title: &str) {
    println!();
    println!("{}", style(format!("Step {}: {}", n, title)).bold().cyan());
    println!();
}

fn ensure_dir(label: &str, dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        Output::info(&format!("{} directory: {}", label, dir.display()));
    } else {
        std::fs::create_dir_all(dir)?;
        Output::success(&format!("Created {} directory: {}", label.to_lowercase(), dir.display()));
    }
    Ok(())
}

fn cancelled(todo: &str) -> anyhow::Result<()> {
    println!();
    Output::info(&format!("Setup stopped. {} and run 'klipp init' again.", todo));
    Ok(())
}

/// Ask a yes/no question on stdin. Anything but y/yes is no.
fn confirm(question: &str) -> io::Result<bool> {
    print!("{} {} {} ", style("?").cyan(), question, style("[y/N]").dim());
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("data").join("runs");
        ensure_dir("Runs", &dir).unwrap();
        assert!(dir.is_dir());
        ensure_dir("Runs", &dir).unwrap();
    }
}
