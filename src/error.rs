//! Error types for Klipp.

use std::path::PathBuf;
use thiserror::Error;

/// Library-level error type for Klipp operations.
#[derive(Error, Debug)]
pub enum KlippError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media source error: {0}")]
    MediaSource(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Malformed timing: {0}")]
    MalformedTiming(String),

    #[error("Timing out of bounds: {0}")]
    TimingOutOfBounds(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid artifact {}: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },

    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<KlippError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

impl KlippError {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KlippError::Timeout(_)
                | KlippError::Http(_)
                | KlippError::OpenAI(_)
                | KlippError::Analysis(_)
                | KlippError::ToolFailed(_)
                | KlippError::Io(_)
        )
    }

    /// Attribute this error to a pipeline stage.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            already @ KlippError::StageFailed { .. } => already,
            other => KlippError::StageFailed {
                stage: stage.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for Klipp operations.
pub type Result<T> = std::result::Result<T, KlippError>;
