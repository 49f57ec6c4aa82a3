//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Run the config command. `config_path` is the `--config` override, if any.
pub fn run_config(action: &ConfigAction, settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(Settings::default_config_path);

    match action {
        ConfigAction::Show => {
            let origin = if config_path.exists() {
                config_path.display().to_string()
            } else {
                "built-in defaults".to_string()
            };
            let body = toml::to_string_pretty(&settings).context("serializing settings")?;
            println!("# effective settings from {}\n{}", origin, body);
        }
        ConfigAction::Edit => edit(&settings, &config_path)?,
        ConfigAction::Path => println!("{}", config_path.display()),
    }

    Ok(())
}

/// Open the config in `$VISUAL` or `$EDITOR`, then reload it to catch mistakes.
fn edit(settings: &Settings, config_path: &Path) -> Result<()> {
    let path = config_path.to_path_buf();
    if !path.exists() {
        settings.save_to(&path)?;
        Output::info(&format!("Wrote defaults to {}", path.display()));
    }

    let editor = ["VISUAL", "EDITOR"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| "vi".to_string());

    let status = std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("launching {} (the config is at {})", editor, path.display()))?;

    if !status.success() {
        Output::warning(&format!("{} exited with {}", editor, status));
        return Ok(());
    }

    match Settings::load_from(Some(&path)) {
        Ok(_) => Output::success("Config is valid."),
        Err(e) => Output::warning(&format!("Config saved, but the next run will reject it: {}", e)),
    }
    Ok(())
}
