//! Title and cover rendering.
//!
//! Purely cosmetic: rendering reads clips but never feeds back into timing
//! or ranking, and a failed render only marks that one clip.

use crate::clips::Clip;
use crate::error::{KlippError, Result};
use crate::media::{apply_video_filter, extract_first_frame};
use crate::retry::{retry_async, RetryConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, instrument, warn};

/// Named look for burned-in titles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleStyle {
    #[default]
    FireFlame,
    CrystalIce,
    NeonGlow,
    MetallicGold,
    MetallicSilver,
    #[serde(rename = "rainbow_3d")]
    Rainbow3d,
    GlowingPlasma,
    StoneCarved,
    GlassTransparent,
    #[serde(rename = "gradient_3d")]
    Gradient3d,
}

impl TitleStyle {
    pub const ALL: [TitleStyle; 10] = [
        TitleStyle::FireFlame,
        TitleStyle::CrystalIce,
        TitleStyle::NeonGlow,
        TitleStyle::MetallicGold,
        TitleStyle::MetallicSilver,
        TitleStyle::Rainbow3d,
        TitleStyle::GlowingPlasma,
        TitleStyle::StoneCarved,
        TitleStyle::GlassTransparent,
        TitleStyle::Gradient3d,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TitleStyle::FireFlame => "fire_flame",
            TitleStyle::CrystalIce => "crystal_ice",
            TitleStyle::NeonGlow => "neon_glow",
            TitleStyle::MetallicGold => "metallic_gold",
            TitleStyle::MetallicSilver => "metallic_silver",
            TitleStyle::Rainbow3d => "rainbow_3d",
            TitleStyle::GlowingPlasma => "glowing_plasma",
            TitleStyle::StoneCarved => "stone_carved",
            TitleStyle::GlassTransparent => "glass_transparent",
            TitleStyle::Gradient3d => "gradient_3d",
        }
    }

    /// drawtext colour, border and shadow for this style.
    fn look(&self) -> TextLook {
        let (fontcolor, bordercolor, borderw, shadowcolor, shadow) = match self {
            TitleStyle::FireFlame => ("0xFFD23F", "0xD7263D", 4, "0x7A0010@0.8", 4),
            TitleStyle::CrystalIce => ("0xE0F7FF", "0x3AA8D8", 3, "0x0B3C5D@0.7", 3),
            TitleStyle::NeonGlow => ("0x39FF14", "0xFF00E6", 3, "0x000000@0.9", 0),
            TitleStyle::MetallicGold => ("0xFFD700", "0x8B6B00", 3, "0x2B2100@0.8", 3),
            TitleStyle::MetallicSilver => ("0xE6E8EA", "0x6D7278", 3, "0x1C1E21@0.8", 3),
            TitleStyle::Rainbow3d => ("0xFF4FD8", "0x2EC4F1", 4, "0x6A00F4@0.9", 6),
            TitleStyle::GlowingPlasma => ("0xF5E6FF", "0x9D4EDD", 5, "0x3C096C@0.8", 2),
            TitleStyle::StoneCarved => ("0xB8B1A6", "0x3E3A35", 2, "0x000000@0.9", 5),
            TitleStyle::GlassTransparent => ("0xFFFFFF@0.75", "0xFFFFFF@0.35", 2, "0x000000@0.4", 2),
            TitleStyle::Gradient3d => ("0xFFB347", "0xFF5E62", 3, "0x5C0029@0.9", 5),
        };
        TextLook {
            fontcolor,
            bordercolor,
            borderw,
            shadowcolor,
            shadow,
        }
    }
}

impl FromStr for TitleStyle {
    type Err = KlippError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        TitleStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| KlippError::InvalidInput(format!("unknown title style: {}", s)))
    }
}

impl fmt::Display for TitleStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TextLook {
    fontcolor: &'static str,
    bordercolor: &'static str,
    borderw: u32,
    shadowcolor: &'static str,
    shadow: u32,
}

/// Escape text for a single-quoted drawtext value.
fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push('\u{2019}'),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            '\n' | '\r' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

/// Build a drawtext filter placing `title` near the top of the frame.
pub fn title_filter(title: &str, style: TitleStyle, font_file: Option<&Path>, font_size: u32) -> String {
    let look = style.look();
    let font = match font_file {
        Some(path) => format!("fontfile='{}':", escape_drawtext(&path.display().to_string())),
        None => String::new(),
    };

    format!(
        "drawtext={font}text='{text}':fontsize={size}:fontcolor={fc}:\
         borderw={bw}:bordercolor={bc}:shadowcolor={sc}:shadowx={sh}:shadowy={sh}:\
         x=(w-text_w)/2:y=h*0.08",
        font = font,
        text = escape_drawtext(title),
        size = font_size,
        fc = look.fontcolor,
        bw = look.borderw,
        bc = look.bordercolor,
        sc = look.shadowcolor,
        sh = look.shadow,
    )
}

/// Trait for title and cover renderers.
#[async_trait]
pub trait ClipRenderer: Send + Sync {
    /// Burn the clip's title into a copy of the clip at `dest`.
    async fn render_title(&self, clip: &Clip, style: TitleStyle, dest: &Path) -> Result<()>;

    /// Write a cover image for the clip at `dest`.
    async fn render_cover(&self, clip: &Clip, style: TitleStyle, dest: &Path) -> Result<()>;
}

/// [`ClipRenderer`] backed by ffmpeg drawtext.
#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    font_file: Option<PathBuf>,
    font_size: u32,
}

impl FfmpegRenderer {
    pub fn new(font_file: Option<PathBuf>, font_size: u32) -> Self {
        Self {
            font_file,
            font_size: font_size.max(8),
        }
    }

    fn filter(&self, clip: &Clip, style: TitleStyle) -> String {
        title_filter(&clip.title, style, self.font_file.as_deref(), self.font_size)
    }
}

#[async_trait]
impl ClipRenderer for FfmpegRenderer {
    async fn render_title(&self, clip: &Clip, style: TitleStyle, dest: &Path) -> Result<()> {
        apply_video_filter(&clip.media_path, dest, &self.filter(clip, style)).await
    }

    async fn render_cover(&self, clip: &Clip, style: TitleStyle, dest: &Path) -> Result<()> {
        extract_first_frame(&clip.media_path, dest, Some(&self.filter(clip, style))).await
    }
}

/// What a render pass produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    Title,
    Cover,
}

/// Result of rendering one clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderOutcome {
    Rendered { rank: usize, path: PathBuf },
    Failed { rank: usize, reason: String },
}

/// Render results for a batch of clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderBatch {
    pub kind: RenderKind,
    pub style: TitleStyle,
    pub outcomes: Vec<RenderOutcome>,
}

impl RenderBatch {
    pub fn failed_ranks(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                RenderOutcome::Failed { rank, .. } => Some(*rank),
                RenderOutcome::Rendered { .. } => None,
            })
            .collect()
    }

    pub fn rendered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RenderOutcome::Rendered { .. }))
            .count()
    }

    /// Every rendered file must still exist.
    pub fn validate(&self) -> Result<()> {
        for outcome in &self.outcomes {
            if let RenderOutcome::Rendered { path, rank } = outcome {
                if !path.is_file() {
                    return Err(KlippError::Artifact {
                        path: path.clone(),
                        reason: format!("rendered output for clip {} is missing", rank),
                    });
                }
            }
        }
        Ok(())
    }
}

fn output_path(kind: RenderKind, style: TitleStyle, clip: &Clip, dir: &Path) -> PathBuf {
    match kind {
        RenderKind::Title => dir.join(format!("{}_{}.mp4", style, clip.file_stem())),
        RenderKind::Cover => dir.join(format!("cover_{}.jpg", clip.file_stem())),
    }
}

/// Render every clip, recording per-clip failures. Each render is retried
/// under `retry` before its clip is marked failed.
#[instrument(skip(renderer, clips, retry), fields(clips = clips.len()))]
pub async fn render_all(
    renderer: &dyn ClipRenderer,
    kind: RenderKind,
    clips: &[&Clip],
    style: TitleStyle,
    dir: &Path,
    retry: &RetryConfig,
) -> Result<RenderBatch> {
    std::fs::create_dir_all(dir)?;

    let mut outcomes = Vec::with_capacity(clips.len());
    for clip in clips {
        let dest = output_path(kind, style, clip, dir);
        let result = retry_async(retry, |_| match kind {
            RenderKind::Title => renderer.render_title(clip, style, &dest),
            RenderKind::Cover => renderer.render_cover(clip, style, &dest),
        })
        .await
        .into_result();
        outcomes.push(match result {
            Ok(()) => RenderOutcome::Rendered {
                rank: clip.rank,
                path: dest,
            },
            Err(e) => {
                warn!("Rendering {:?} for clip {} failed: {}", kind, clip.rank, e);
                RenderOutcome::Failed {
                    rank: clip.rank,
                    reason: e.to_string(),
                }
            }
        });
    }

    let batch = RenderBatch { kind, style, outcomes };
    info!("Rendered {} of {} {:?} artifact(s)", batch.rendered(), clips.len(), kind);
    Ok(batch)
}
