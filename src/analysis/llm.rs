//! Engagement analysis over an OpenAI-compatible chat API.

use super::{
    AnalysisContext, EngagementAnalyzer, HighlightCandidate, RawCandidate, ScoreTier, SelectionRequest,
    ServiceSelection,
};
use crate::config::{language_instruction, AnalysisSettings, Prompts};
use crate::error::{KlippError, Result};
use crate::openai::{create_client, Endpoint};
use crate::segmenting::Segment;
use crate::timing::{format_clock, parse_timestamp, Millis, SegmentTime};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// LLM-backed engagement analyzer.
pub struct LlmAnalyzer {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: Prompts,
}

impl LlmAnalyzer {
    pub fn from_settings(settings: &AnalysisSettings, prompts: Prompts) -> Result<Self> {
        let endpoint = Endpoint::new(settings.base_url.as_deref(), &settings.api_key_env)
            .with_timeout(Duration::from_secs(settings.timeout_secs.max(1)));

        Ok(Self {
            client: create_client(&endpoint)?,
            model: settings.model.clone(),
            prompts,
        })
    }

    async fn complete(&self, system: String, user: String) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| KlippError::Analysis(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| KlippError::Analysis(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.3)
            .build()
            .map_err(|e| KlippError::Analysis(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| KlippError::OpenAI(format!("Analysis request failed: {}", e)))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| KlippError::Analysis("Empty response from LLM".to_string()))
    }
}

fn write_debug_prompt(dir: Option<&Path>, name: &str, system: &str, user: &str) {
    let Some(dir) = dir else { return };
    let written = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(dir.join(name), format!("# system\n{}\n\n# user\n{}\n", system, user)));
    if let Err(e) = written {
        warn!("Could not write debug prompt {}: {}", name, e);
    }
}

#[async_trait]
impl EngagementAnalyzer for LlmAnalyzer {
    #[instrument(skip_all, fields(segment = segment.index))]
    async fn analyze_segment(&self, segment: &Segment, context: &AnalysisContext) -> Result<Vec<RawCandidate>> {
        let mut vars = HashMap::new();
        vars.insert("part_number".to_string(), (segment.index + 1).to_string());
        vars.insert("part_count".to_string(), context.segment_count.to_string());
        vars.insert("duration".to_string(), format_clock(segment.duration));
        vars.insert(
            "background".to_string(),
            context
                .background
                .as_deref()
                .map(|b| format!("Background:\n{}\n", b.trim()))
                .unwrap_or_default(),
        );
        vars.insert("transcript".to_string(), segment.captions.format_with_timestamps());
        vars.insert("max_candidates".to_string(), context.candidates_per_segment.to_string());
        vars.insert("min_duration".to_string(), context.min_duration.as_secs_f64().round().to_string());
        vars.insert("max_duration".to_string(), context.max_duration.as_secs_f64().round().to_string());
        vars.insert(
            "language_instruction".to_string(),
            language_instruction(&context.language).to_string(),
        );

        let system = self.prompts.render_with_custom(&self.prompts.analysis.system, &vars);
        let user = self.prompts.render_with_custom(&self.prompts.analysis.user, &vars);
        write_debug_prompt(
            context.debug_dir.as_deref(),
            &format!("segment_{:03}_prompt.txt", segment.index),
            &system,
            &user,
        );

        let content = self.complete(system, user).await?;
        debug!("Analysis response: {}", preview(&content, 500));

        parse_moments(&content)
    }

    #[instrument(skip_all, fields(pool = pool.len()))]
    async fn select(&self, pool: &[HighlightCandidate], request: &SelectionRequest) -> Result<ServiceSelection> {
        let listing: Vec<Value> = pool
            .iter()
            .enumerate()
            .map(|(id, c)| {
                serde_json::json!({
                    "id": id,
                    "segment": c.segment_index,
                    "start": format_clock(c.absolute_start.offset()),
                    "end": format_clock(c.absolute_end.offset()),
                    "duration_seconds": c.duration().as_secs_f64().round(),
                    "engagement_level": c.score_tier.as_str(),
                    "title": c.title,
                    "why_engaging": c.rationale,
                })
            })
            .collect();

        let mut vars = HashMap::new();
        vars.insert("candidates".to_string(), serde_json::to_string_pretty(&listing)?);
        vars.insert("max_clips".to_string(), request.max_clips.to_string());
        vars.insert("max_mentions".to_string(), request.max_mentions.to_string());
        vars.insert(
            "language_instruction".to_string(),
            language_instruction(&request.language).to_string(),
        );

        let system = self.prompts.render_with_custom(&self.prompts.aggregation.system, &vars);
        let user = self.prompts.render_with_custom(&self.prompts.aggregation.user, &vars);
        write_debug_prompt(request.debug_dir.as_deref(), "aggregation_prompt.txt", &system, &user);

        let content = self.complete(system, user).await?;
        parse_selection(&content, pool.len())
    }
}

/// Pull the JSON document out of a model response that may wrap it in prose
/// or a code fence.
pub fn extract_json(response: &str) -> &str {
    if let Some(fence) = response.find("```") {
        let after = &response[fence + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(close) = body.find("```") {
            return body[..close].trim();
        }
    }

    let open = response.find(['{', '[']);
    let close = response.rfind(['}', ']']);
    match (open, close) {
        (Some(start), Some(end)) if end > start => &response[start..=end],
        _ => response.trim(),
    }
}

#[derive(Debug, Deserialize)]
struct WireMoment {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    start_time: Option<Value>,
    #[serde(default)]
    end_time: Option<Value>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    engagement_level: Option<String>,
    #[serde(default)]
    why_engaging: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

fn time_value(value: &Value) -> Option<Millis> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_f64().filter(|v| *v >= 0.0).map(Millis::from_secs_f64),
        _ => None,
    }
}

impl WireMoment {
    fn into_candidate(self) -> Option<RawCandidate> {
        let title = self.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
        let start = self.start_time.as_ref().and_then(time_value)?;
        let end = self.end_time.as_ref().and_then(time_value)?;

        Some(RawCandidate {
            local_start: SegmentTime::new(start),
            local_end: SegmentTime::new(end),
            title,
            transcript_excerpt: self.transcript.unwrap_or_default(),
            score_tier: self
                .engagement_level
                .as_deref()
                .map(ScoreTier::parse_lenient)
                .unwrap_or_default(),
            rationale: self.why_engaging.unwrap_or_default(),
            tags: self
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<BTreeSet<_>>(),
        })
    }
}

/// The first `max_chars` characters of a model response, for logs and errors.
fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Parse an analysis response into raw candidates.
///
/// Individual moments missing a title or a readable time are skipped. A
/// response that is not a JSON object or array of moments is an error.
pub fn parse_moments(response: &str) -> Result<Vec<RawCandidate>> {
    let json = extract_json(response);
    let value: Value = serde_json::from_str(json).map_err(|e| {
        KlippError::Analysis(format!(
            "Failed to parse analysis response: {}. Response was: {}",
            e,
            preview(response, 500)
        ))
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("engaging_moments") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(KlippError::Analysis("engaging_moments is not a list".to_string())),
        },
        _ => return Err(KlippError::Analysis("analysis response is not a JSON object".to_string())),
    };

    let total = items.len();
    let candidates: Vec<RawCandidate> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<WireMoment>(item).ok())
        .filter_map(WireMoment::into_candidate)
        .collect();

    if candidates.len() < total {
        debug!("Skipped {} malformed moment(s)", total - candidates.len());
    }
    Ok(candidates)
}

fn selection_id(item: &Value) -> Option<usize> {
    let id = match item {
        Value::Object(map) => map.get("id")?,
        other => other,
    };
    match id {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a selection response. Ids outside the pool and repeats are dropped.
pub fn parse_selection(response: &str, pool_len: usize) -> Result<ServiceSelection> {
    let value: Value = serde_json::from_str(extract_json(response))
        .map_err(|e| KlippError::Analysis(format!("Failed to parse selection response: {}", e)))?;

    let Value::Object(map) = value else {
        return Err(KlippError::Analysis("selection response is not a JSON object".to_string()));
    };

    let mut seen = HashSet::new();
    let mut ids_for = |key: &str| -> Vec<usize> {
        map.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(selection_id)
                    .filter(|id| *id < pool_len && seen.insert(*id))
                    .collect()
            })
            .unwrap_or_default()
    };

    let top = ids_for("top_engaging_moments");
    let honorable = ids_for("honorable_mentions");
    Ok(ServiceSelection { top, honorable })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moments_long_cjk_reply_is_an_error() {
        let reply = "抱歉".repeat(300);
        let err = parse_moments(&reply).unwrap_err();
        assert!(matches!(err, KlippError::Analysis(_)));
        assert!(err.to_string().contains(&"抱歉".repeat(250)));
        assert!(!err.to_string().contains(&"抱歉".repeat(251)));
    }

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        assert_eq!(preview("héllo", 2), "hé");
        assert_eq!(preview("abc", 10), "abc");
    }

    #[test]
    fn test_parse_moments_plain_object() {
        let response = r#"{"engaging_moments": [
            {"title": "The reveal", "start_time": "01:10", "end_time": "02:30",
             "transcript": "and then", "engagement_level": "high",
             "why_engaging": "twist", "tags": ["story", " "]},
            {"title": "No end", "start_time": "00:10"},
            {"start_time": "00:10", "end_time": "00:50"}
        ]}"#;

        let moments = parse_moments(response).unwrap();
        assert_eq!(moments.len(), 1);
        let m = &moments[0];
        assert_eq!(m.local_start, SegmentTime::from_millis(70_000));
        assert_eq!(m.local_end, SegmentTime::from_millis(150_000));
        assert_eq!(m.score_tier, ScoreTier::High);
        assert_eq!(m.tags.len(), 1);
    }

    #[test]
    fn test_parse_moments_in_fence_with_defaults() {
        let response = "Here you go:\n```json\n{\"engaging_moments\": [{\"title\": \"x\", \"start_time\": 12.5, \"end_time\": \"00:00:45.250\"}]}\n```\nEnjoy.";

        let moments = parse_moments(response).unwrap();
        assert_eq!(moments.len(), 1);
        assert_eq!(moments[0].local_start, SegmentTime::from_millis(12_500));
        assert_eq!(moments[0].local_end, SegmentTime::from_millis(45_250));
        assert_eq!(moments[0].score_tier, ScoreTier::Medium);
        assert!(moments[0].transcript_excerpt.is_empty());
    }

    #[test]
    fn test_parse_moments_rejects_garbage() {
        assert!(matches!(parse_moments("no idea, sorry"), Err(KlippError::Analysis(_))));
        assert!(matches!(parse_moments("\"just a string\""), Err(KlippError::Analysis(_))));
        assert!(parse_moments("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_selection_drops_unknown_and_repeated_ids() {
        let response = r#"{"top_engaging_moments": [{"id": 3, "reason": "a"}, {"id": "1"}, {"id": 42}, {"id": 3}],
                           "honorable_mentions": [{"id": 1}, {"id": 0}]}"#;

        let selection = parse_selection(response, 5).unwrap();
        assert_eq!(selection.top, vec![3, 1]);
        assert_eq!(selection.honorable, vec![0]);
    }
}
