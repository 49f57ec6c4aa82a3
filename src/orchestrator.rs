//! Pipeline orchestrator for Klipp.
//!
//! Wires the collaborators into the stage runner and drives one run from
//! source acquisition to rendered covers.

use crate::aggregation::{Aggregator, HighlightSet, SelectionCriteria};
use crate::analysis::{
    AnalysisContext, CandidateCollector, CollectionReport, EngagementAnalyzer, LlmAnalyzer, SegmentCandidates,
    SelectionRequest,
};
use crate::captions::CaptionTrack;
use crate::clips::{Clip, ClipBatch, ClipSynthesizer};
use crate::config::{AggregationMode, AggregationSettings, Prompts, Settings};
use crate::error::{KlippError, Result};
use crate::media::{FfmpegExtractor, MediaExtractor};
use crate::media_source::{parse_input, MediaSource, SourceMedia};
use crate::pipeline::artifacts::{self, RunLayout};
use crate::pipeline::{
    CaptionArtifact, PipelineState, Produced, Provenance, SegmentsArtifact, SqliteStateStore, Stage, StageReport,
    StageRunner, Unit,
};
use crate::render::{render_all, ClipRenderer, FfmpegRenderer, RenderBatch, RenderKind, TitleStyle};
use crate::retry::RetryConfig;
use crate::segmenting::Segmenter;
use crate::timing::Millis;
use crate::transcription::{Transcriber, WhisperTranscriber};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Collaborators the pipeline talks to.
pub struct Components {
    /// Used for every input instead of URL/path detection when set.
    pub source: Option<Arc<dyn MediaSource>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub analyzer: Arc<dyn EngagementAnalyzer>,
    pub extractor: Arc<dyn MediaExtractor>,
    pub renderer: Arc<dyn ClipRenderer>,
}

/// Per-run options, defaulting to the configured settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub skip: BTreeSet<Stage>,
    pub force_transcribe: bool,
    pub clips: bool,
    pub titles: bool,
    pub covers: bool,
    pub style: TitleStyle,
    pub max_clips: usize,
    pub segment_minutes: f64,
    pub background: Option<PathBuf>,
    pub language: String,
    pub aggregation: AggregationMode,
    pub show_progress: bool,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            skip: BTreeSet::new(),
            force_transcribe: settings.transcription.force,
            clips: settings.clips.enabled,
            titles: settings.render.titles,
            covers: settings.render.covers,
            style: settings.render.style.parse()?,
            max_clips: settings.aggregation.max_clips,
            segment_minutes: settings.segmentation.max_segment_minutes,
            background: settings.analysis.background_file.as_deref().map(Settings::expand_path),
            language: settings.analysis.language.clone(),
            aggregation: settings.analysis.aggregation_mode,
            show_progress: true,
        })
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct RunResult {
    pub source: SourceMedia,
    pub run_dir: PathBuf,
    pub state: PipelineState,
    pub reports: Vec<StageReport>,
    pub highlights: HighlightSet,
    pub clips: Option<ClipBatch>,
}

/// The main orchestrator for the Klipp pipeline.
pub struct Orchestrator {
    settings: Settings,
    components: Components,
    /// Segment parts are cut with stream copy regardless of clip settings.
    part_extractor: Arc<dyn MediaExtractor>,
    store: SqliteStateStore,
}

impl Orchestrator {
    /// Create an orchestrator with the production collaborators.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let analyzer: Arc<dyn EngagementAnalyzer> = Arc::new(LlmAnalyzer::from_settings(&settings.analysis, prompts)?);

        let transcriber: Option<Arc<dyn Transcriber>> = match WhisperTranscriber::from_settings(&settings.transcription) {
            Ok(t) => Some(Arc::new(t)),
            Err(e) => {
                warn!("Transcription unavailable, platform captions only: {}", e);
                None
            }
        };

        let renderer = Arc::new(FfmpegRenderer::new(
            settings.render.font_file.as_deref().map(Settings::expand_path),
            settings.render.font_size,
        ));

        let components = Components {
            source: None,
            transcriber,
            analyzer,
            extractor: Arc::new(FfmpegExtractor::new(settings.clips.reencode)),
            renderer,
        };

        let mut orchestrator = Self::with_components(settings, components)?;
        orchestrator.part_extractor = Arc::new(FfmpegExtractor::new(false));
        Ok(orchestrator)
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(settings: Settings, components: Components) -> Result<Self> {
        std::fs::create_dir_all(settings.runs_dir())?;
        std::fs::create_dir_all(settings.temp_dir())?;
        let store = SqliteStateStore::new(&settings.state_db_path())?;

        Ok(Self {
            part_extractor: components.extractor.clone(),
            settings,
            components,
            store,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &SqliteStateStore {
        &self.store
    }

    fn resolve(&self, input: &str) -> Result<(Arc<dyn MediaSource>, String)> {
        match &self.components.source {
            Some(source) => {
                let id = source.extract_id(input).unwrap_or_else(|| input.to_string());
                Ok((source.clone(), id))
            }
            None => {
                let (source, id) = parse_input(input, &self.settings.download)?;
                Ok((Arc::from(source), id))
            }
        }
    }

    /// Source key for an input, without acquiring anything.
    pub fn source_key(&self, input: &str) -> Result<String> {
        let (source, id) = self.resolve(input)?;
        Ok(source.source_key(&id))
    }

    /// Persisted state for an input or a source key.
    pub fn state_for(&self, input_or_key: &str) -> Result<Option<PipelineState>> {
        let key = self
            .source_key(input_or_key)
            .unwrap_or_else(|_| input_or_key.to_string());
        recorded_state(&self.settings.runs_dir(), &self.store, &key)
    }

    /// Run (or resume) the pipeline for `input`.
    #[instrument(skip(self, options), fields(input = %input))]
    pub async fn run(&self, input: &str, options: &RunOptions) -> Result<RunResult> {
        let (source, id) = self.resolve(input)?;
        let key = source.source_key(&id);
        let layout = RunLayout::new(&self.settings.runs_dir(), &key);
        info!("Run directory: {}", layout.root().display());

        let background = match &options.background {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                KlippError::Config(format!("Cannot read background file {}: {}", path.display(), e))
            })?),
            None => None,
        };

        let mut runner = StageRunner::open(&layout, Some(&self.store), &key, input, options.skip.clone())?;

        let media = runner
            .run(Stage::Download, &layout.source(), || async {
                let media = source.acquire(&id, &layout.media_dir()).await?;
                info!("Acquired '{}' ({})", media.title, media.duration);
                Ok(Produced::new(media))
            })
            .await?;

        let captions = runner
            .run(Stage::Caption, &layout.captions_json(), || {
                self.caption_stage(&media, &layout, options.force_transcribe)
            })
            .await?;

        let segmenter = Segmenter::from_minutes(options.segment_minutes)?;
        let segments = runner
            .run(Stage::Segment, &layout.segments(), || {
                self.segment_stage(&media, &captions.track, &segmenter, &layout)
            })
            .await?;

        let criteria = SelectionCriteria::from_settings(
            &AggregationSettings {
                max_clips: options.max_clips,
                ..self.settings.aggregation.clone()
            },
            options.aggregation,
        );

        let context = AnalysisContext {
            segment_count: segments.segments.len(),
            background,
            language: options.language.clone(),
            min_duration: criteria.min_duration,
            max_duration: criteria.max_duration,
            candidates_per_segment: self.settings.analysis.candidates_per_segment,
            debug_dir: self.settings.analysis.debug_prompts.then(|| layout.debug_dir()),
        };

        let collected = runner
            .run(Stage::Analyze, &layout.candidates(), || {
                self.analyze_stage(&segments, &context, &layout, options.show_progress)
            })
            .await?;

        let highlights = runner
            .run(Stage::Aggregate, &layout.highlights(), || async {
                let pool = collected.pool();
                let request = SelectionRequest {
                    max_clips: criteria.max_clips,
                    max_mentions: criteria.max_honorable_mentions,
                    language: options.language.clone(),
                    debug_dir: context.debug_dir.clone(),
                };
                let set = Aggregator::new(criteria)
                    .run(&pool, self.components.analyzer.as_ref(), &request)
                    .await;
                set.validate()?;

                let note = format!("{} highlight(s) from {} candidate(s)", set.highlights.len(), pool.len());
                Ok(Produced::new(set).with_note(note))
            })
            .await?;

        let mut clips = None;
        if options.clips {
            let batch = runner
                .run(Stage::SynthesizeClips, &layout.clips(), || async {
                    let synthesizer = ClipSynthesizer::new(self.components.extractor.as_ref(), layout.clips_dir())
                        .with_captions(self.settings.clips.write_captions)
                        .with_progress(options.show_progress)
                        .with_retry(RetryConfig::for_call(
                            "clip extraction",
                            self.settings.clips.timeout_secs,
                            self.settings.clips.max_attempts,
                        ));
                    let batch = synthesizer.synthesize_all(&highlights, &segments.segments).await?;
                    let affected = batch.failed_ranks().into_iter().map(Unit::Highlight).collect();
                    Ok(Produced::new(batch).with_affected(affected))
                })
                .await?;

            let made: Vec<&Clip> = batch.clips().collect();
            self.render_stage(&mut runner, RenderKind::Title, options.titles, &made, options.style)
                .await?;
            self.render_stage(&mut runner, RenderKind::Cover, options.covers, &made, options.style)
                .await?;
            clips = Some(batch);
        } else {
            for stage in [Stage::SynthesizeClips, Stage::RenderTitles, Stage::GenerateCovers] {
                runner.disabled(stage, "clip synthesis is off");
            }
        }

        let (state, reports) = runner.finish()?;
        info!("Run {} complete", key);

        Ok(RunResult {
            source: media,
            run_dir: layout.root().to_path_buf(),
            state,
            reports,
            highlights,
            clips,
        })
    }

    async fn caption_stage(
        &self,
        media: &SourceMedia,
        layout: &RunLayout,
        force_transcribe: bool,
    ) -> Result<Produced<CaptionArtifact>> {
        let platform = match &media.caption_path {
            Some(path) => match CaptionTrack::load(path) {
                Ok(track) if !track.is_empty() => Some(track),
                Ok(_) => {
                    warn!("Platform captions at {} have no usable cues", path.display());
                    None
                }
                Err(e) => {
                    warn!("Could not read platform captions {}: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };

        let mut note = None;
        let mut artifact = match (platform, force_transcribe) {
            (Some(track), false) => CaptionArtifact {
                provenance: Provenance::Platform,
                track,
            },
            (platform, _) => match self.transcribe(media).await {
                Ok(track) => CaptionArtifact {
                    provenance: Provenance::Transcribed,
                    track,
                },
                Err(e) => {
                    warn!("Transcription failed: {}", e);
                    note = Some(format!("transcription failed: {}", e));
                    match platform {
                        Some(track) => CaptionArtifact {
                            provenance: Provenance::Platform,
                            track,
                        },
                        None => CaptionArtifact {
                            provenance: Provenance::None,
                            track: CaptionTrack::new(),
                        },
                    }
                }
            },
        };

        // Cues past the end of the media cannot be segmented.
        artifact.track = artifact.track.subrange(Millis::ZERO, media.duration);

        artifacts::write_atomic(&layout.captions_srt(), artifact.track.to_srt().as_bytes())?;
        info!(
            "Captions: {} cue(s) ({:?})",
            artifact.track.len(),
            artifact.provenance
        );

        let mut produced = Produced::new(artifact);
        produced.note = note;
        Ok(produced)
    }

    async fn transcribe(&self, media: &SourceMedia) -> Result<CaptionTrack> {
        let transcriber = self
            .components
            .transcriber
            .as_ref()
            .ok_or_else(|| KlippError::Transcription("no transcriber configured".to_string()))?;
        transcriber.transcribe(&media.media_path, Millis::ZERO, media.duration).await
    }

    async fn segment_stage(
        &self,
        media: &SourceMedia,
        captions: &CaptionTrack,
        segmenter: &Segmenter,
        layout: &RunLayout,
    ) -> Result<Produced<SegmentsArtifact>> {
        let plans = segmenter.plan(captions, media.duration)?;

        let single = plans.len() == 1;
        if !single {
            std::fs::create_dir_all(layout.parts_dir())?;
            for plan in &plans {
                self.part_extractor
                    .extract(
                        &media.media_path,
                        plan.start.offset(),
                        plan.end.offset(),
                        &layout.part_media(plan.index),
                    )
                    .await?;
            }
        }

        let segments = segmenter.build(&plans, captions, |plan| {
            if single {
                media.media_path.clone()
            } else {
                layout.part_media(plan.index)
            }
        })?;

        let note = format!("{} segment(s)", segments.len());
        Ok(Produced::new(SegmentsArtifact {
            source_duration: media.duration,
            max_duration: segmenter.max_duration(),
            segments,
        })
        .with_note(note))
    }

    async fn analyze_stage(
        &self,
        segments: &SegmentsArtifact,
        context: &AnalysisContext,
        layout: &RunLayout,
        show_progress: bool,
    ) -> Result<Produced<CollectionReport>> {
        let previous: HashMap<usize, SegmentCandidates> = segments
            .segments
            .iter()
            .filter_map(|s| {
                artifacts::load_valid::<SegmentCandidates>(&layout.segment_candidates(s.index))
                    .filter(|c| c.segment_index == s.index)
                    .map(|c| (s.index, c))
            })
            .collect();

        let retry = RetryConfig::from_analysis(&self.settings.analysis);
        let collector = CandidateCollector::new(
            self.components.analyzer.as_ref(),
            retry,
            self.settings.analysis.max_concurrent,
        )
        .with_progress(show_progress);

        let report = collector
            .collect(&segments.segments, context, &previous, |settled| {
                artifacts::save(&layout.segment_candidates(settled.segment_index), settled)
            })
            .await?;

        let failed = report.failed_segments();
        for index in &failed {
            warn!("Segment {} contributed no candidates", index);
        }

        let note = format!(
            "{} candidate(s) from {} segment(s), {} failed",
            report.pool().len(),
            report.segments.len(),
            failed.len()
        );
        let affected = failed.into_iter().map(Unit::Segment).collect();
        Ok(Produced::new(report).with_affected(affected).with_note(note))
    }

    async fn render_stage(
        &self,
        runner: &mut StageRunner<'_>,
        kind: RenderKind,
        enabled: bool,
        clips: &[&Clip],
        style: TitleStyle,
    ) -> Result<()> {
        let layout = runner.layout().clone();
        let (stage, path, dir) = match kind {
            RenderKind::Title => (Stage::RenderTitles, layout.titles(), layout.titled_dir()),
            RenderKind::Cover => (Stage::GenerateCovers, layout.covers(), layout.covers_dir()),
        };

        if !enabled {
            runner.disabled(stage, "turned off");
            return Ok(());
        }

        runner
            .run(stage, &path, || async {
                let retry = RetryConfig::for_call(
                    format!("{:?} rendering", kind),
                    self.settings.render.timeout_secs,
                    self.settings.render.max_attempts,
                );
                let batch: RenderBatch =
                    render_all(self.components.renderer.as_ref(), kind, clips, style, &dir, &retry).await?;
                let affected = batch.failed_ranks().into_iter().map(Unit::Highlight).collect();
                Ok(Produced::new(batch).with_affected(affected))
            })
            .await?;
        Ok(())
    }
}

/// State recorded for `source_key`: the run directory first, then the run index.
pub fn recorded_state(runs_dir: &Path, store: &SqliteStateStore, source_key: &str) -> Result<Option<PipelineState>> {
    let layout = RunLayout::new(runs_dir, source_key);
    match artifacts::load_valid::<PipelineState>(&layout.state()) {
        Some(state) => Ok(Some(state)),
        None => store.load(source_key),
    }
}
