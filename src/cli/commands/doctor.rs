//! Doctor command - verify system requirements and configuration.

use crate::cli::Output;
use crate::config::Settings;
use console::style;
use std::path::Path;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            hint: hint.map(str::to_string),
        }
    }

    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, message, None)
    }

    fn warning(name: &str, message: impl Into<String>, hint: &str) -> Self {
        Self::new(name, CheckStatus::Warning, message, Some(hint))
    }

    fn error(name: &str, message: impl Into<String>, hint: &str) -> Self {
        Self::new(name, CheckStatus::Error, message, Some(hint))
    }

    pub(super) fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("Klipp Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let sections = [
        ("External Tools", tool_checks(settings)),
        ("API Configuration", api_checks(settings)),
        ("Directories", directory_checks(settings)),
        ("Configuration", config_checks(settings)),
    ];

    for (title, checks) in &sections {
        println!("{}", style(title).bold());
        for check in checks {
            check.print();
        }
        println!();
    }

    let count = |status: CheckStatus| {
        sections
            .iter()
            .flat_map(|(_, checks)| checks)
            .filter(|c| c.status == status)
            .count()
    };
    let errors = count(CheckStatus::Error);
    let warnings = count(CheckStatus::Warning);

    if errors > 0 {
        Output::error(&format!("{} error(s) found. Please fix them before running Klipp.", errors));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Klipp is ready to cut clips.");
    }

    Ok(())
}

pub(super) fn tool_checks(settings: &Settings) -> Vec<CheckResult> {
    let mut checks = vec![
        check_tool("yt-dlp", &["--version"], install_hint("yt-dlp")),
        check_tool("ffmpeg", &["-version"], install_hint("ffmpeg")),
        check_tool("ffprobe", &["-version"], install_hint("ffmpeg")),
    ];

    if settings.render.titles || settings.render.covers {
        checks.push(check_drawtext());
    }
    checks
}

/// Run `<name> <args>` and report the first line of its output.
fn check_tool(name: &str, args: &[&str], hint: &str) -> CheckResult {
    match Command::new(name).args(args).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .chars()
                .take(50)
                .collect::<String>();
            CheckResult::ok(name, version)
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::error(name, "not found", hint),
        Err(e) => CheckResult::error(name, format!("error: {}", e), hint),
    }
}

/// Titles and covers are drawn with ffmpeg's drawtext filter.
fn check_drawtext() -> CheckResult {
    let hint = "Install an ffmpeg build with libfreetype, or run with --no-titles --no-covers";
    match Command::new("ffmpeg").args(["-hide_banner", "-filters"]).output() {
        Ok(output) if String::from_utf8_lossy(&output.stdout).contains("drawtext") => {
            CheckResult::ok("drawtext", "available")
        }
        Ok(_) => CheckResult::warning("drawtext", "filter missing from ffmpeg", hint),
        Err(_) => CheckResult::warning("drawtext", "could not query ffmpeg filters", hint),
    }
}

fn api_checks(settings: &Settings) -> Vec<CheckResult> {
    let mut checks = vec![check_api_key(&settings.analysis.api_key_env, true)];
    if settings.transcription.api_key_env != settings.analysis.api_key_env {
        checks.push(check_api_key(&settings.transcription.api_key_env, false));
    }
    checks
}

/// Check that an API key variable is set. Transcription only runs for videos
/// without captions, so its key is optional.
fn check_api_key(var: &str, required: bool) -> CheckResult {
    let hint = format!("Set with: export {}='sk-...'", var);
    match std::env::var(var) {
        Ok(key) if key.trim().is_empty() => CheckResult::error(var, "empty", &hint),
        Ok(key) if key.is_ascii() && key.len() > 11 => {
            CheckResult::ok(var, format!("configured ({}...{})", &key[..7], &key[key.len() - 4..]))
        }
        Ok(_) => CheckResult::warning(var, "set but looks malformed", "Check the key value"),
        Err(_) if required => CheckResult::error(var, "not set", &hint),
        Err(_) => CheckResult::warning(var, "not set (transcription fallback disabled)", &hint),
    }
}

fn directory_checks(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let runs_dir = settings.runs_dir();
    if runs_dir.exists() {
        let count = std::fs::read_dir(&runs_dir).map(|d| d.count()).unwrap_or(0);
        results.push(CheckResult::ok(
            "Runs directory",
            format!("{} ({} run(s))", runs_dir.display(), count),
        ));
    } else {
        results.push(CheckResult::warning(
            "Runs directory",
            format!("{} (will be created)", runs_dir.display()),
            "Created on the first run",
        ));
    }

    let db_path = settings.state_db_path();
    match std::fs::metadata(&db_path) {
        Ok(meta) => results.push(CheckResult::ok(
            "Run index",
            format!("{} ({})", db_path.display(), format_size(meta.len())),
        )),
        Err(_) => results.push(CheckResult::warning(
            "Run index",
            format!("{} (not created yet)", db_path.display()),
            "Created on the first run",
        )),
    }

    results
}

fn config_checks(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let config_path = Settings::default_config_path();
    results.push(if config_path.exists() {
        CheckResult::ok("Config file", config_path.display().to_string())
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: klipp init (or klipp config edit)",
        )
    });

    results.push(check_settings(settings));

    if let Some(font) = &settings.render.font_file {
        results.push(check_path_exists("Font file", &Settings::expand_path(font), false));
    }
    if let Some(dir) = &settings.prompts.custom_dir {
        results.push(check_path_exists("Prompt overrides", &Settings::expand_path(dir), true));
    }
    if let Some(file) = &settings.analysis.background_file {
        results.push(check_path_exists("Background file", &Settings::expand_path(file), false));
    }

    results
}

/// Check that the loaded settings are usable.
fn check_settings(settings: &Settings) -> CheckResult {
    match settings.validate() {
        Ok(()) => CheckResult::ok(
            "Settings",
            format!(
                "K={}, segments of {} min, {} aggregation, {} titles",
                settings.aggregation.max_clips,
                settings.segmentation.max_segment_minutes,
                settings.analysis.aggregation_mode,
                settings.render.style
            ),
        ),
        Err(e) => CheckResult::error("Settings", e.to_string(), "Fix the value with: klipp config edit"),
    }
}

fn check_path_exists(name: &str, path: &Path, is_dir: bool) -> CheckResult {
    let found = if is_dir { path.is_dir() } else { path.is_file() };
    if found {
        CheckResult::ok(name, path.display().to_string())
    } else {
        CheckResult::error(
            name,
            format!("{} not found", path.display()),
            "Fix the path with: klipp config edit",
        )
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = None;
    for u in UNITS {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = Some(u);
    }

    match unit {
        Some(u) => format!("{:.1} {}", size, u),
        None => format!("{} B", bytes),
    }
}

/// Platform-specific install hint.
fn install_hint(tool: &str) -> &'static str {
    match (tool, cfg!(target_os = "macos"), cfg!(target_os = "linux")) {
        ("yt-dlp", true, _) => "Install with: brew install yt-dlp",
        ("yt-dlp", _, true) => "Install with: pip install yt-dlp (or your package manager)",
        ("yt-dlp", _, _) => "Install from: https://github.com/yt-dlp/yt-dlp",
        (_, true, _) => "Install with: brew install ffmpeg",
        (_, _, true) => "Install with: sudo apt install ffmpeg (or your package manager)",
        _ => "Install from: https://ffmpeg.org/download.html",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_default_settings_pass() {
        let result = check_settings(&Settings::default());
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(result.message.contains("K=5"));
    }

    #[test]
    fn test_missing_optional_key_is_warning() {
        let result = check_api_key("KLIPP_DOCTOR_KEY_THAT_IS_NEVER_SET", false);
        assert_eq!(result.status, CheckStatus::Warning);
        let result = check_api_key("KLIPP_DOCTOR_KEY_THAT_IS_NEVER_SET", true);
        assert_eq!(result.status, CheckStatus::Error);
    }

    #[test]
    fn test_configured_paths_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.prompts.custom_dir = Some(dir.path().display().to_string());
        settings.render.font_file = Some(dir.path().join("missing.ttf").display().to_string());

        let results = config_checks(&settings);
        let font = results.iter().find(|r| r.name == "Font file").unwrap();
        assert_eq!(font.status, CheckStatus::Error);
        let prompts = results.iter().find(|r| r.name == "Prompt overrides").unwrap();
        assert_eq!(prompts.status, CheckStatus::Ok);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_install_hints_name_the_tool() {
        assert!(install_hint("yt-dlp").contains("yt-dlp"));
        assert!(install_hint("ffprobe").contains("ffmpeg"));
    }
}
