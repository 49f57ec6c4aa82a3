//! Configuration settings for Klipp.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub download: DownloadSettings,
    pub transcription: TranscriptionSettings,
    pub segmentation: SegmentationSettings,
    pub analysis: AnalysisSettings,
    pub aggregation: AggregationSettings,
    pub clips: ClipSettings,
    pub render: RenderSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for run artifacts and the state database.
    pub data_dir: String,
    /// Directory for temporary files.
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.klipp".to_string(),
            temp_dir: "/tmp/klipp".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Media download settings (yt-dlp).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// yt-dlp format selector.
    pub format: String,
    /// Subtitle languages to request, in order of preference.
    pub subtitle_languages: Vec<String>,
    /// Optional cookies file (needed for some Bilibili content).
    pub cookies_file: Option<String>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            format: "bestvideo[height<=1080]+bestaudio/best".to_string(),
            subtitle_languages: vec!["zh-Hans".to_string(), "zh".to_string(), "en".to_string()],
            cookies_file: None,
        }
    }
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// OpenAI-compatible API base URL. None uses the OpenAI default.
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Whisper model to use.
    pub model: String,
    /// Window length for splitting long audio.
    pub chunk_duration_seconds: u32,
    /// Maximum concurrent window transcriptions.
    pub max_concurrent_chunks: usize,
    /// Language hint passed to the model.
    pub language: Option<String>,
    /// Transcribe even when platform captions exist.
    pub force: bool,
    /// Deadline for one window request.
    pub timeout_secs: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "whisper-1".to_string(),
            chunk_duration_seconds: 600,
            max_concurrent_chunks: 3,
            language: None,
            force: false,
            timeout_secs: 300,
        }
    }
}

/// Segmentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Maximum segment length in minutes.
    pub max_segment_minutes: f64,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            max_segment_minutes: 20.0,
        }
    }
}

/// How the final top-K list is produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Rank locally from tiers and durations.
    #[default]
    Local,
    /// Ask the analysis service to pick, then normalize locally.
    Service,
}

impl std::str::FromStr for AggregationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(AggregationMode::Local),
            "service" | "llm" => Ok(AggregationMode::Service),
            _ => Err(format!("Unknown aggregation mode: {}", s)),
        }
    }
}

impl std::fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationMode::Local => write!(f, "local"),
            AggregationMode::Service => write!(f, "service"),
        }
    }
}

/// Engagement analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// OpenAI-compatible API base URL. None uses the OpenAI default.
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Chat model used for analysis and aggregation.
    pub model: String,
    /// Maximum concurrent segment analyses.
    pub max_concurrent: usize,
    /// Per-call timeout.
    pub timeout_secs: u64,
    /// Attempts per segment before giving up.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Output language for titles and rationales (zh or en).
    pub language: String,
    /// Optional free-text background context file.
    pub background_file: Option<String>,
    pub aggregation_mode: AggregationMode,
    /// Candidates requested per segment.
    pub candidates_per_segment: usize,
    /// Write rendered prompts into the run directory.
    pub debug_prompts: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_concurrent: 3,
            timeout_secs: 180,
            max_attempts: 3,
            base_backoff_ms: 2000,
            max_backoff_ms: 30_000,
            language: "en".to_string(),
            background_file: None,
            aggregation_mode: AggregationMode::Local,
            candidates_per_segment: 5,
            debug_prompts: false,
        }
    }
}

/// Aggregation bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    /// K: number of highlights to keep.
    pub max_clips: usize,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    /// Preferred highlight length; candidates closer to it rank higher within a tier.
    pub target_duration_secs: u64,
    /// Minimum gap between two picks from the same segment.
    pub min_separation_secs: u64,
    pub max_honorable_mentions: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            max_clips: 5,
            min_duration_secs: 30,
            max_duration_secs: 240,
            target_duration_secs: 90,
            min_separation_secs: 10,
            max_honorable_mentions: 5,
        }
    }
}

/// Clip synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipSettings {
    pub enabled: bool,
    /// Re-encode for frame-accurate cuts instead of stream copy.
    pub reencode: bool,
    /// Write a re-zeroed SRT next to each clip.
    pub write_captions: bool,
    /// Deadline for one ffmpeg cut.
    pub timeout_secs: u64,
    /// Attempts per clip, including the first.
    pub max_attempts: u32,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reencode: true,
            write_captions: true,
            timeout_secs: 600,
            max_attempts: 2,
        }
    }
}

/// Title and cover rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub titles: bool,
    pub covers: bool,
    /// Style token, e.g. fire_flame or crystal_ice.
    pub style: String,
    /// Font file for drawtext. None lets ffmpeg pick through fontconfig.
    pub font_file: Option<String>,
    pub font_size: u32,
    /// Deadline for rendering one title or cover.
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            titles: true,
            covers: true,
            style: "fire_flame".to_string(),
            font_file: None,
            font_size: 48,
            timeout_secs: 600,
            max_attempts: 2,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Reject values that would make the pipeline loop or divide by zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::KlippError;

        if !(self.segmentation.max_segment_minutes > 0.0) {
            return Err(KlippError::Config(
                "segmentation.max_segment_minutes must be positive".to_string(),
            ));
        }
        if self.aggregation.min_duration_secs > self.aggregation.max_duration_secs {
            return Err(KlippError::Config(format!(
                "aggregation.min_duration_secs ({}) exceeds max_duration_secs ({})",
                self.aggregation.min_duration_secs, self.aggregation.max_duration_secs
            )));
        }
        if self.analysis.max_concurrent == 0 || self.transcription.max_concurrent_chunks == 0 {
            return Err(KlippError::Config("concurrency limits must be at least 1".to_string()));
        }
        if [
            self.analysis.timeout_secs,
            self.transcription.timeout_secs,
            self.clips.timeout_secs,
            self.render.timeout_secs,
        ]
        .contains(&0)
        {
            return Err(KlippError::Config("timeouts must be at least 1 second".to_string()));
        }
        if self.transcription.chunk_duration_seconds == 0 {
            return Err(KlippError::Config(
                "transcription.chunk_duration_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::KlippError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("klipp")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Directory holding one subdirectory per source key.
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir().join("runs")
    }

    /// SQLite database recording run state.
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir().join("klipp.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [aggregation]
            max_clips = 3

            [analysis]
            aggregation_mode = "service"
            "#,
        )
        .unwrap();

        assert_eq!(settings.aggregation.max_clips, 3);
        assert_eq!(settings.aggregation.min_duration_secs, 30);
        assert_eq!(settings.analysis.aggregation_mode, AggregationMode::Service);
        assert_eq!(settings.segmentation.max_segment_minutes, 20.0);
        assert_eq!(settings.render.style, "fire_flame");
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        settings.aggregation.min_duration_secs = 300;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.clips.timeout_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();
        settings.analysis.language = "zh".to_string();
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.analysis.language, "zh");
    }
}
