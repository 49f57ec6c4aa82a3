//! ffmpeg and ffprobe wrappers.

use crate::error::{KlippError, Result};
use crate::timing::Millis;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Run an external tool, mapping a missing binary to `ToolNotFound` and a
/// non-zero exit to `ToolFailed` with the tool's stderr. The child is killed if
/// the returned future is dropped, so a timed-out call leaves nothing running.
pub(crate) async fn run_tool<I, S>(program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let result = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KlippError::ToolNotFound(program.to_string()));
        }
        Err(e) => {
            return Err(KlippError::ToolFailed(format!("{program} execution failed: {e}")));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KlippError::ToolFailed(format!("{program} failed: {}", stderr.trim())));
    }

    Ok(output)
}

fn secs_arg(ms: Millis) -> String {
    format!("{:.3}", ms.as_secs_f64())
}

/// Query the duration of a media file.
pub async fn probe_duration(path: &Path) -> Result<Millis> {
    if !path.exists() {
        return Err(KlippError::MediaNotFound(path.display().to_string()));
    }

    let output = run_tool(
        "ffprobe",
        [
            OsStr::new("-v"),
            OsStr::new("quiet"),
            OsStr::new("-print_format"),
            OsStr::new("json"),
            OsStr::new("-show_format"),
            path.as_os_str(),
        ],
    )
    .await?;

    let json_str = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|_| KlippError::ToolFailed("Invalid ffprobe output".into()))?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .map(Millis::from_secs_f64)
        .ok_or_else(|| KlippError::ToolFailed(format!("Could not determine duration of {}", path.display())))
}

/// Cut `[start, end)` out of `source` into `dest`.
///
/// Stream copy is tried first unless `reencode` is set; a failed copy falls
/// back to an H.264/AAC re-encode.
#[instrument(skip_all, fields(source = %source.display(), start = %start, end = %end))]
pub async fn extract_range(source: &Path, dest: &Path, start: Millis, end: Millis, reencode: bool) -> Result<()> {
    if !source.exists() {
        return Err(KlippError::MediaNotFound(source.display().to_string()));
    }
    let length = end.checked_sub(start).filter(|l| !l.is_zero()).ok_or_else(|| {
        KlippError::InvalidInput(format!("empty extraction range {start}..{end}"))
    })?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let start_arg = secs_arg(start);
    let length_arg = secs_arg(length);

    if !reencode {
        let copy = run_tool(
            "ffmpeg",
            [
                OsStr::new("-ss"),
                OsStr::new(&start_arg),
                OsStr::new("-i"),
                source.as_os_str(),
                OsStr::new("-t"),
                OsStr::new(&length_arg),
                OsStr::new("-c"),
                OsStr::new("copy"),
                OsStr::new("-avoid_negative_ts"),
                OsStr::new("make_zero"),
                OsStr::new("-y"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                dest.as_os_str(),
            ],
        )
        .await;

        match copy {
            Ok(_) if dest.exists() => return Ok(()),
            Ok(_) => warn!("Stream copy produced no output, re-encoding"),
            Err(KlippError::ToolNotFound(tool)) => return Err(KlippError::ToolNotFound(tool)),
            Err(e) => warn!("Stream copy failed, re-encoding: {}", e),
        }
    }

    run_tool(
        "ffmpeg",
        [
            OsStr::new("-ss"),
            OsStr::new(&start_arg),
            OsStr::new("-i"),
            source.as_os_str(),
            OsStr::new("-t"),
            OsStr::new(&length_arg),
            OsStr::new("-c:v"),
            OsStr::new("libx264"),
            OsStr::new("-preset"),
            OsStr::new("fast"),
            OsStr::new("-crf"),
            OsStr::new("23"),
            OsStr::new("-c:a"),
            OsStr::new("aac"),
            OsStr::new("-b:a"),
            OsStr::new("128k"),
            OsStr::new("-y"),
            OsStr::new("-loglevel"),
            OsStr::new("error"),
            dest.as_os_str(),
        ],
    )
    .await?;

    debug!("Extracted {} to {}", length, dest.display());
    Ok(())
}

/// Extract a mono 16 kHz MP3 track, the format speech models expect.
pub async fn extract_audio(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    run_tool(
        "ffmpeg",
        [
            OsStr::new("-i"),
            source.as_os_str(),
            OsStr::new("-vn"),
            OsStr::new("-ac"),
            OsStr::new("1"),
            OsStr::new("-ar"),
            OsStr::new("16000"),
            OsStr::new("-codec:a"),
            OsStr::new("libmp3lame"),
            OsStr::new("-qscale:a"),
            OsStr::new("4"),
            OsStr::new("-y"),
            OsStr::new("-loglevel"),
            OsStr::new("error"),
            dest.as_os_str(),
        ],
    )
    .await?;
    Ok(())
}

/// Split an audio file into windows of at most `window` length.
///
/// Returns `(path, offset)` pairs in order.
#[instrument(skip_all)]
pub async fn split_audio(source: &Path, output_dir: &Path, window: Millis) -> Result<Vec<(PathBuf, Millis)>> {
    std::fs::create_dir_all(output_dir)?;

    let total = probe_duration(source).await?;
    info!("Total audio duration: {}", total);

    if total <= window || window.is_zero() {
        return Ok(vec![(source.to_path_buf(), Millis::ZERO)]);
    }

    let base_name = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");

    let mut windows = Vec::new();
    let mut offset = Millis::ZERO;
    let mut idx = 0u32;

    while offset < total {
        let path = output_dir.join(format!("{}_{:04}.mp3", base_name, idx));
        let end = (offset + window).min(total);
        extract_range(source, &path, offset, end, false).await?;
        debug!("Created audio window {} at {}", idx, offset);
        windows.push((path, offset));
        offset = end;
        idx += 1;
    }

    info!("Created {} audio windows", windows.len());
    Ok(windows)
}

/// Grab the first frame of a video as an image, optionally through a filter graph.
pub async fn extract_first_frame(source: &Path, dest: &Path, filter: Option<&str>) -> Result<()> {
    if !source.exists() {
        return Err(KlippError::MediaNotFound(source.display().to_string()));
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut args: Vec<&OsStr> = vec![OsStr::new("-i"), source.as_os_str()];
    if let Some(filter) = filter {
        args.extend([OsStr::new("-vf"), OsStr::new(filter)]);
    }
    args.extend([
        OsStr::new("-frames:v"),
        OsStr::new("1"),
        OsStr::new("-q:v"),
        OsStr::new("2"),
        OsStr::new("-y"),
        OsStr::new("-loglevel"),
        OsStr::new("error"),
        dest.as_os_str(),
    ]);

    run_tool("ffmpeg", args).await?;
    Ok(())
}

/// Apply a video filter graph, copying audio through untouched.
pub async fn apply_video_filter(source: &Path, dest: &Path, filter: &str) -> Result<()> {
    if !source.exists() {
        return Err(KlippError::MediaNotFound(source.display().to_string()));
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    run_tool(
        "ffmpeg",
        [
            OsStr::new("-i"),
            source.as_os_str(),
            OsStr::new("-vf"),
            OsStr::new(filter),
            OsStr::new("-c:v"),
            OsStr::new("libx264"),
            OsStr::new("-preset"),
            OsStr::new("fast"),
            OsStr::new("-c:a"),
            OsStr::new("copy"),
            OsStr::new("-y"),
            OsStr::new("-loglevel"),
            OsStr::new("error"),
            dest.as_os_str(),
        ],
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_arg() {
        assert_eq!(secs_arg(Millis(1_234_567)), "1234.567");
        assert_eq!(secs_arg(Millis::ZERO), "0.000");
    }

    #[tokio::test]
    async fn test_missing_tool_maps_to_tool_not_found() {
        let err = run_tool("klipp-definitely-not-a-real-binary", ["--version"])
            .await
            .unwrap_err();
        assert!(matches!(err, KlippError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_extract_from_missing_media() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_range(
            &dir.path().join("missing.mp4"),
            &dir.path().join("out.mp4"),
            Millis(0),
            Millis(1000),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KlippError::MediaNotFound(_)));
    }
}
