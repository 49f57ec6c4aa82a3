//! Prompt templates for Klipp.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    /// Per-segment highlight discovery.
    pub analysis: AnalysisPrompts,
    /// Global selection across segments (service aggregation mode).
    pub aggregation: AggregationPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for per-segment analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPrompts {
    pub system: String,
    pub user: String,
}

impl Default for AnalysisPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a short-form video editor. You read transcripts of long videos and find the self-contained moments that would hold a viewer's attention as standalone clips.

A good moment:
- makes sense without the surrounding context
- has a hook in its first seconds (a question, a surprising claim, a conflict, a punchline)
- ends on a natural beat rather than mid-sentence

Ignore intros, outros, sponsor reads and requests to like or subscribe.

Answer with JSON only."#
                .to_string(),

            user: r#"This is part {{part_number}} of {{part_count}} of a longer video. The part lasts {{duration}}.
All timestamps below are relative to the start of this part.

{{background}}
Transcript:
{{transcript}}

Find up to {{max_candidates}} engaging moments. Each moment must last between {{min_duration}} and {{max_duration}} seconds and must lie entirely inside this part.

Respond with a JSON object:
{
  "engaging_moments": [
    {
      "title": "short catchy title",
      "start_time": "MM:SS",
      "end_time": "MM:SS",
      "transcript": "the key lines of the moment",
      "engagement_level": "high | medium | low",
      "why_engaging": "one or two sentences",
      "tags": ["topic", "emotion"]
    }
  ]
}

{{language_instruction}}"#
                .to_string(),
        }
    }
}

/// Prompts for service-side aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPrompts {
    pub system: String,
    pub user: String,
}

impl Default for AggregationPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are the final editor for a highlight reel. You receive candidate moments that were found independently in different parts of one video, and you choose the strongest set.

Prefer moments with high engagement, varied topics and no repetition. Never invent candidates; refer to them only by id.

Answer with JSON only."#
                .to_string(),

            user: r#"Candidates:
{{candidates}}

Pick the best {{max_clips}} moments, best first. Then list up to {{max_mentions}} honorable mentions.

Respond with a JSON object:
{
  "top_engaging_moments": [ { "id": 3, "reason": "..." } ],
  "honorable_mentions": [ { "id": 7 } ]
}

{{language_instruction}}"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let analysis_path = custom_path.join("analysis.toml");
            if analysis_path.exists() {
                let content = std::fs::read_to_string(&analysis_path)?;
                prompts.analysis = toml::from_str(&content)?;
            }

            let aggregation_path = custom_path.join("aggregation.toml");
            if aggregation_path.exists() {
                let content = std::fs::read_to_string(&aggregation_path)?;
                prompts.aggregation = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

/// Instruction appended to prompts so titles come back in the requested language.
pub fn language_instruction(language: &str) -> &'static str {
    match language {
        "zh" | "zh-CN" | "zh-Hans" => "请用简体中文撰写 title、why_engaging 和 reason 字段。",
        _ => "Write the title, why_engaging and reason fields in English.",
    }
}
