//! Stage artifacts and the run directory layout.
//!
//! Every artifact is JSON, written atomically and validated on load. A file
//! that fails to parse or validate is treated as absent.

use crate::aggregation::HighlightSet;
use crate::analysis::{CollectionReport, SegmentCandidates};
use crate::captions::CaptionTrack;
use crate::clips::ClipBatch;
use crate::error::{KlippError, Result};
use crate::media_source::SourceMedia;
use crate::render::RenderBatch;
use crate::segmenting::{verify_plan, Segment, SegmentPlan};
use crate::timing::Millis;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Paths inside one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(runs_dir: &Path, source_key: &str) -> Self {
        Self {
            root: runs_dir.join(source_key),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn state(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn source(&self) -> PathBuf {
        self.root.join("source.json")
    }

    /// Downloaded media lands here.
    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    pub fn captions_json(&self) -> PathBuf {
        self.root.join("captions.json")
    }

    pub fn captions_srt(&self) -> PathBuf {
        self.root.join("captions.srt")
    }

    pub fn segments(&self) -> PathBuf {
        self.root.join("segments.json")
    }

    pub fn parts_dir(&self) -> PathBuf {
        self.root.join("parts")
    }

    pub fn part_media(&self, index: usize) -> PathBuf {
        self.parts_dir().join(format!("part_{:02}.mp4", index))
    }

    pub fn candidates_dir(&self) -> PathBuf {
        self.root.join("candidates")
    }

    pub fn segment_candidates(&self, index: usize) -> PathBuf {
        self.candidates_dir().join(format!("segment_{:03}.json", index))
    }

    pub fn candidates(&self) -> PathBuf {
        self.root.join("candidates.json")
    }

    pub fn highlights(&self) -> PathBuf {
        self.root.join("highlights.json")
    }

    pub fn clips(&self) -> PathBuf {
        self.root.join("clips.json")
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join("clips")
    }

    pub fn titles(&self) -> PathBuf {
        self.root.join("titles.json")
    }

    pub fn titled_dir(&self) -> PathBuf {
        self.root.join("titled")
    }

    pub fn covers(&self) -> PathBuf {
        self.root.join("covers.json")
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.root.join("covers")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.root.join("debug")
    }
}

/// A persisted stage output.
pub trait Artifact: Serialize + DeserializeOwned {
    /// Structural checks beyond deserialization.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Write `contents` to `path` via a temporary file in the same directory.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize an artifact as pretty JSON and write it atomically.
pub fn save<T: Artifact>(path: &Path, artifact: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(artifact)?;
    json.push(b'\n');
    write_atomic(path, &json)
}

/// Load and validate an artifact.
pub fn load<T: Artifact>(path: &Path) -> Result<T> {
    let artifact_error = |reason: String| KlippError::Artifact {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| artifact_error(e.to_string()))?;
    let artifact: T = serde_json::from_slice(&bytes).map_err(|e| artifact_error(e.to_string()))?;
    artifact.validate().map_err(|e| artifact_error(e.to_string()))?;
    Ok(artifact)
}

/// Load an artifact if a valid one exists.
pub fn load_valid<T: Artifact>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match load(path) {
        Ok(artifact) => Some(artifact),
        Err(e) => {
            debug!("Ignoring invalid artifact: {}", e);
            None
        }
    }
}

impl Artifact for SourceMedia {
    fn validate(&self) -> Result<()> {
        if !self.media_path.is_file() {
            return Err(KlippError::MediaNotFound(self.media_path.display().to_string()));
        }
        Ok(())
    }
}

/// Where the full caption track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Platform,
    Transcribed,
    None,
}

/// Caption stage output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionArtifact {
    pub provenance: Provenance,
    pub track: CaptionTrack,
}

impl Artifact for CaptionArtifact {
    fn validate(&self) -> Result<()> {
        match self.track.cues().iter().find(|c| c.start >= c.end) {
            Some(cue) => Err(KlippError::MalformedTiming(format!("cue {} is empty", cue.index))),
            None => Ok(()),
        }
    }
}

/// Segment stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentsArtifact {
    pub source_duration: Millis,
    pub max_duration: Millis,
    pub segments: Vec<Segment>,
}

impl Artifact for SegmentsArtifact {
    fn validate(&self) -> Result<()> {
        let plans: Vec<SegmentPlan> = self
            .segments
            .iter()
            .map(|s| SegmentPlan {
                index: s.index,
                start: s.offset,
                end: s.end(),
            })
            .collect();
        verify_plan(&plans, &CaptionTrack::new(), self.source_duration)?;

        for segment in &self.segments {
            if !segment.media.is_file() {
                return Err(KlippError::MediaNotFound(segment.media.display().to_string()));
            }
        }
        Ok(())
    }
}

impl Artifact for SegmentCandidates {}

impl Artifact for CollectionReport {
    fn validate(&self) -> Result<()> {
        for pair in self.segments.windows(2) {
            if pair[0].segment_index >= pair[1].segment_index {
                return Err(KlippError::InvariantViolation(
                    "segment results are not in ascending order".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Artifact for HighlightSet {
    fn validate(&self) -> Result<()> {
        HighlightSet::validate(self)
    }
}

impl Artifact for ClipBatch {
    fn validate(&self) -> Result<()> {
        ClipBatch::validate(self)
    }
}

impl Artifact for RenderBatch {
    fn validate(&self) -> Result<()> {
        RenderBatch::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::CaptionCue;

    #[test]
    fn test_layout_paths() {
        let layout = RunLayout::new(Path::new("/data/runs"), "yt_abc");
        assert_eq!(layout.segment_candidates(7), PathBuf::from("/data/runs/yt_abc/candidates/segment_007.json"));
        assert_eq!(layout.part_media(3), PathBuf::from("/data/runs/yt_abc/parts/part_03.mp4"));
        assert_eq!(layout.state(), PathBuf::from("/data/runs/yt_abc/state.json"));
    }

    #[test]
    fn test_save_and_load_caption_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captions.json");
        let artifact = CaptionArtifact {
            provenance: Provenance::Platform,
            track: CaptionTrack::from_cues(vec![CaptionCue::new(1, Millis(0), Millis(900), "hi")]),
        };

        save(&path, &artifact).unwrap();
        let first = std::fs::read(&path).unwrap();
        assert_eq!(load::<CaptionArtifact>(&path).unwrap(), artifact);

        save(&path, &artifact).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_corrupt_or_invalid_artifacts_are_absent() {
        let dir = tempfile::tempdir().unwrap();

        let corrupt = dir.path().join("captions.json");
        std::fs::write(&corrupt, b"{ not json").unwrap();
        assert!(load_valid::<CaptionArtifact>(&corrupt).is_none());
        assert!(matches!(
            load::<CaptionArtifact>(&corrupt),
            Err(KlippError::Artifact { .. })
        ));

        // Segment media that no longer exists invalidates the artifact.
        let segments = SegmentsArtifact {
            source_duration: Millis(1_000),
            max_duration: Millis(1_000),
            segments: vec![Segment {
                index: 0,
                media: dir.path().join("missing.mp4"),
                offset: crate::timing::SourceTime::ORIGIN,
                duration: Millis(1_000),
                captions: CaptionTrack::new(),
            }],
        };
        let path = dir.path().join("segments.json");
        save(&path, &segments).unwrap();
        assert!(load_valid::<SegmentsArtifact>(&path).is_none());

        assert!(load_valid::<CaptionArtifact>(&dir.path().join("absent.json")).is_none());
    }
}
