//! Video and subtitle download through yt-dlp.

use super::ffmpeg::run_tool;
use crate::config::DownloadSettings;
use crate::error::{KlippError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Metadata reported by `yt-dlp --dump-json`.
#[derive(Debug, Clone)]
pub struct RemoteMetadata {
    pub title: String,
    pub duration_secs: Option<f64>,
    pub uploader: Option<String>,
}

/// Files produced by a download.
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub media_path: PathBuf,
    /// Platform subtitles converted to SRT, when the platform had any.
    pub caption_path: Option<PathBuf>,
}

fn cookie_args(settings: &DownloadSettings) -> Vec<OsString> {
    match &settings.cookies_file {
        Some(file) => vec![
            OsString::from("--cookies"),
            OsString::from(shellexpand::tilde(file).to_string()),
        ],
        None => Vec::new(),
    }
}

fn map_ytdlp_error(url: &str, err: KlippError) -> KlippError {
    match err {
        KlippError::ToolFailed(msg) => KlippError::MediaNotFound(format!("{url} unavailable: {msg}")),
        other => other,
    }
}

/// Fetch title and duration without downloading.
pub async fn fetch_metadata(url: &str, settings: &DownloadSettings) -> Result<RemoteMetadata> {
    let mut args: Vec<OsString> = vec![
        "--dump-json".into(),
        "--no-download".into(),
        "--no-warnings".into(),
        "--no-playlist".into(),
    ];
    args.extend(cookie_args(settings));
    args.push(url.into());

    let output = run_tool("yt-dlp", args)
        .await
        .map_err(|e| map_ytdlp_error(url, e))?;

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| KlippError::MediaSource(format!("Failed to parse yt-dlp output: {}", e)))?;

    Ok(RemoteMetadata {
        title: json["title"].as_str().unwrap_or("Unknown Title").to_string(),
        duration_secs: json["duration"].as_f64(),
        uploader: json["uploader"]
            .as_str()
            .or_else(|| json["channel"].as_str())
            .map(|s| s.to_string()),
    })
}

/// Download a video and any platform subtitles into `output_dir`.
///
/// Files are named after `file_id`; an existing download is reused.
#[instrument(skip(settings, output_dir), fields(file_id = %file_id))]
pub async fn download_video(
    url: &str,
    file_id: &str,
    output_dir: &Path,
    settings: &DownloadSettings,
) -> Result<DownloadedMedia> {
    std::fs::create_dir_all(output_dir)?;

    let target_path = output_dir.join(format!("{}.mp4", file_id));
    if target_path.exists() {
        info!("Using cached download");
        return Ok(DownloadedMedia {
            media_path: target_path,
            caption_path: find_caption_file(output_dir, file_id),
        });
    }

    info!("Downloading {}", url);

    let template = output_dir.join(format!("{}.%(ext)s", file_id));
    let mut args: Vec<OsString> = vec![
        "--format".into(),
        settings.format.clone().into(),
        "--merge-output-format".into(),
        "mp4".into(),
        "--output".into(),
        template.into_os_string(),
        "--no-playlist".into(),
        "--quiet".into(),
        "--no-warnings".into(),
    ];

    if !settings.subtitle_languages.is_empty() {
        args.extend([
            OsString::from("--write-subs"),
            OsString::from("--write-auto-subs"),
            OsString::from("--sub-langs"),
            OsString::from(settings.subtitle_languages.join(",")),
            OsString::from("--convert-subs"),
            OsString::from("srt"),
        ]);
    }
    args.extend(cookie_args(settings));
    args.push(url.into());

    run_tool("yt-dlp", args)
        .await
        .map_err(|e| match e {
            KlippError::ToolFailed(msg) => KlippError::Download(msg),
            other => other,
        })?;

    let media_path = find_media_file(output_dir, file_id)?;
    let caption_path = find_caption_file(output_dir, file_id);
    debug!("Downloaded media {:?}, captions {:?}", media_path, caption_path);

    Ok(DownloadedMedia {
        media_path,
        caption_path,
    })
}

/// Locate the merged video file.
fn find_media_file(dir: &Path, file_id: &str) -> Result<PathBuf> {
    for ext in ["mp4", "mkv", "webm", "flv"] {
        let candidate = dir.join(format!("{}.{}", file_id, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(KlippError::Download("Media file not found after download".into()))
}

/// Locate subtitles yt-dlp wrote as `<id>.<lang>.srt` (or `.vtt` if conversion failed).
pub fn find_caption_file(dir: &Path, file_id: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let prefix = format!("{}.", file_id);

    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            name.starts_with(&prefix) && (name.ends_with(".srt") || name.ends_with(".vtt"))
        })
        .collect();

    // Prefer SRT, then a stable order.
    found.sort_by_key(|p| (p.extension().and_then(|e| e.to_str()) != Some("srt"), p.clone()));
    found.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_caption_file_prefers_srt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yt_abc.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("yt_abc.en.vtt"), b"WEBVTT").unwrap();
        std::fs::write(dir.path().join("yt_abc.en.srt"), b"").unwrap();
        std::fs::write(dir.path().join("other.en.srt"), b"").unwrap();

        let found = find_caption_file(dir.path(), "yt_abc").unwrap();
        assert_eq!(found.file_name().unwrap(), "yt_abc.en.srt");
        assert!(find_caption_file(dir.path(), "missing").is_none());
    }

    #[test]
    fn test_find_media_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_media_file(dir.path(), "x").is_err());
        std::fs::write(dir.path().join("x.mkv"), b"").unwrap();
        assert!(find_media_file(dir.path(), "x").unwrap().ends_with("x.mkv"));
    }

    #[test]
    fn test_cookie_args() {
        let mut settings = DownloadSettings::default();
        assert!(cookie_args(&settings).is_empty());
        settings.cookies_file = Some("/tmp/cookies.txt".into());
        assert_eq!(cookie_args(&settings).len(), 2);
    }
}
