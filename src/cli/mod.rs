//! CLI module for Klipp.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use crate::config::AggregationMode;
use crate::pipeline::Stage;
use crate::render::TitleStyle;
use clap::{Args, Parser, Subcommand};

/// Klipp - highlight clips from long-form video
///
/// Splits a long video into segments, asks a language model for the most
/// engaging moments in each, ranks them globally and cuts the winners into
/// standalone clips with retimed captions.
#[derive(Parser, Debug)]
#[command(name = "klipp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize Klipp and verify system requirements
    Init,

    /// Check system requirements and configuration
    Doctor,

    /// Run (or resume) the highlight pipeline for a video
    Run(RunArgs),

    /// Show the pipeline state of a run
    Status {
        /// Input that started the run, or its source key
        input: String,
    },

    /// List recorded runs
    List,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// YouTube or Bilibili URL, or a local video file
    pub input: String,

    /// Reuse an existing artifact for this stage (repeatable)
    #[arg(long = "skip", value_name = "STAGE")]
    pub skip: Vec<Stage>,

    /// Transcribe even when platform captions exist
    #[arg(long)]
    pub force_transcribe: bool,

    /// Stop after aggregation
    #[arg(long)]
    pub no_clips: bool,

    /// Do not burn titles into clips
    #[arg(long)]
    pub no_titles: bool,

    /// Do not generate cover images
    #[arg(long)]
    pub no_covers: bool,

    /// Title style (e.g. fire_flame, crystal_ice, neon_tech)
    #[arg(long)]
    pub style: Option<TitleStyle>,

    /// Number of highlights to keep
    #[arg(long, value_name = "K")]
    pub max_clips: Option<usize>,

    /// Maximum segment length in minutes
    #[arg(long, value_name = "D")]
    pub segment_minutes: Option<f64>,

    /// Text file with background about the video and its speakers
    #[arg(long, value_name = "FILE")]
    pub background: Option<String>,

    /// Language of titles and rationales (zh or en)
    #[arg(long)]
    pub language: Option<String>,

    /// Where the final ranking happens
    #[arg(long, value_name = "MODE")]
    pub aggregation: Option<AggregationMode>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
