//! Configuration module for Klipp.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{language_instruction, AggregationPrompts, AnalysisPrompts, Prompts};
pub use settings::{
    AggregationMode, AggregationSettings, AnalysisSettings, ClipSettings, DownloadSettings,
    GeneralSettings, PromptSettings, RenderSettings, SegmentationSettings, Settings,
    TranscriptionSettings,
};
