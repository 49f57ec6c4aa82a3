//! Whisper transcription over an OpenAI-compatible audio API.

use super::Transcriber;
use crate::captions::{CaptionCue, CaptionTrack};
use crate::config::TranscriptionSettings;
use crate::error::{KlippError, Result};
use crate::media::{extract_audio, split_audio};
use crate::openai::{create_client, Endpoint};
use crate::retry::{retry_async, RetryConfig};
use crate::timing::Millis;
use async_openai::config::OpenAIConfig;
use async_openai::types::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Whisper-based transcriber.
pub struct WhisperTranscriber {
    client: Client<OpenAIConfig>,
    model: String,
    language: Option<String>,
    window: Millis,
    max_concurrent: usize,
    retry: RetryConfig,
}

impl WhisperTranscriber {
    pub fn from_settings(settings: &TranscriptionSettings) -> Result<Self> {
        let client = create_client(&Endpoint::new(settings.base_url.as_deref(), &settings.api_key_env))?;

        Ok(Self {
            client,
            model: settings.model.clone(),
            language: settings.language.clone(),
            window: Millis::from_secs(u64::from(settings.chunk_duration_seconds)),
            max_concurrent: settings.max_concurrent_chunks.max(1),
            retry: RetryConfig::for_call("transcription", settings.timeout_secs, 3),
        })
    }

    /// Transcribe one audio file, returning cues relative to its start.
    #[instrument(skip(self), fields(audio = %audio_path.display()))]
    async fn transcribe_window(&self, audio_path: &Path) -> Result<Vec<CaptionCue>> {
        let file_bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(AudioInput::from_vec_u8(file_name, file_bytes))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson);

        if let Some(lang) = &self.language {
            request_builder.language(lang);
        }

        let request = request_builder
            .build()
            .map_err(|e| KlippError::Transcription(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(|e| KlippError::OpenAI(format!("Whisper API error: {}", e)))?;

        let cues: Vec<CaptionCue> = match response.segments {
            Some(segments) => segments
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    CaptionCue::new(
                        i as u32 + 1,
                        Millis::from_secs_f64(s.start as f64),
                        Millis::from_secs_f64(s.end as f64),
                        s.text.trim(),
                    )
                })
                .collect(),
            None => vec![CaptionCue::new(
                1,
                Millis::ZERO,
                Millis::from_secs_f64(response.duration as f64),
                response.text.trim(),
            )],
        };

        debug!("Transcribed {} cues", cues.len());
        Ok(cues)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, media: &Path, start: Millis, end: Millis) -> Result<CaptionTrack> {
        let temp_dir = tempfile::tempdir()?;
        let audio_path = temp_dir.path().join("audio.mp3");
        extract_audio(media, &audio_path).await?;

        let windows: Vec<_> = split_audio(&audio_path, &temp_dir.path().join("windows"), self.window)
            .await?
            .into_iter()
            .filter(|(_, offset)| *offset < end && *offset + self.window > start)
            .collect();

        let window_count = windows.len();
        info!("Transcribing {} audio window(s) with {}", window_count, self.model);

        let pb = ProgressBar::new(window_count as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} Whisper   [{bar:30.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }

        let mut results: Vec<(usize, Millis, Vec<CaptionCue>)> = Vec::with_capacity(window_count);

        let mut stream = stream::iter(windows.into_iter().enumerate())
            .map(|(idx, (path, offset))| async move {
                let result = retry_async(&self.retry, |_| self.transcribe_window(&path))
                    .await
                    .into_result();
                (idx, offset, result)
            })
            .buffer_unordered(self.max_concurrent);

        while let Some((idx, offset, result)) = stream.next().await {
            pb.inc(1);
            match result {
                Ok(cues) => results.push((idx, offset, cues)),
                Err(e) => {
                    pb.finish_and_clear();
                    return Err(KlippError::Transcription(format!(
                        "Window {} at {} failed: {}",
                        idx, offset, e
                    )));
                }
            }
        }
        pb.finish_and_clear();

        results.sort_by_key(|(idx, _, _)| *idx);

        let mut cues = Vec::new();
        for (_, offset, window_cues) in results {
            for cue in window_cues {
                cues.push(CaptionCue {
                    index: cues.len() as u32 + 1,
                    start: cue.start + offset,
                    end: cue.end + offset,
                    text: cue.text,
                });
            }
        }

        Ok(CaptionTrack::from_cues(cues).subrange(start, end))
    }
}
