//! CLI-based transcoder using the external ffmpeg/ffprobe binaries

use super::traits::{CaptureStream, Transcoder};
use crate::config::ToolsConfig;
use crate::types::MediaInfo;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Number of trailing stderr bytes kept in error messages
const STDERR_TAIL: usize = 512;

/// Transcoder backed by the `ffmpeg` and `ffprobe` binaries
///
/// Every operation stream-copies (`-c copy`), so splitting never re-encodes and
/// runs at disk speed.
///
/// # Examples
///
/// ```no_run
/// use media_ferry::transcode::FfmpegTranscoder;
/// use std::path::PathBuf;
///
/// // Create with explicit paths
/// let transcoder = FfmpegTranscoder::new(
///     PathBuf::from("/usr/bin/ffmpeg"),
///     PathBuf::from("/usr/bin/ffprobe"),
/// );
///
/// // Or auto-discover from PATH
/// let transcoder = FfmpegTranscoder::from_path()
///     .expect("ffmpeg not found in PATH");
/// ```
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegTranscoder {
    /// Create a transcoder with explicit binary paths
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    /// Attempt to find ffmpeg and ffprobe in PATH
    ///
    /// Returns `None` unless both binaries are found.
    pub fn from_path() -> Option<Self> {
        let ffmpeg = which::which("ffmpeg").ok()?;
        let ffprobe = which::which("ffprobe").ok()?;
        Some(Self::new(ffmpeg, ffprobe))
    }

    /// Build from configuration, preferring explicit paths over PATH lookup
    pub fn from_config(tools: &ToolsConfig) -> Option<Self> {
        let lookup = |explicit: &Option<PathBuf>, name: &str| match explicit {
            Some(path) => Some(path.clone()),
            None if tools.search_path => which::which(name).ok(),
            None => None,
        };
        let ffmpeg = lookup(&tools.ffmpeg_path, "ffmpeg")?;
        let ffprobe = lookup(&tools.ffprobe_path, "ffprobe")?;
        Some(Self::new(ffmpeg, ffprobe))
    }

    /// Run a binary to completion and fail on non-zero exit
    async fn run<I, S>(&self, binary: &Path, args: I) -> crate::Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let tool = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| binary.display().to_string());

        let output = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute {}: {}", tool, e)))?;

        if !output.status.success() {
            return Err(crate::Error::ExternalTool(format!(
                "{} exited with {}: {}",
                tool,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        Ok(output)
    }
}

/// Last few hundred bytes of a tool's stderr, trimmed
fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

/// Parse `ffprobe -show_entries format=duration -of default=nw=1:nk=1` output
pub(crate) fn parse_duration(stdout: &[u8]) -> Option<f64> {
    let text = String::from_utf8_lossy(stdout);
    let duration: f64 = text.lines().next()?.trim().parse().ok()?;
    (duration.is_finite() && duration >= 0.0).then_some(duration)
}

/// Files in `dir` that were not in `before`, sorted by name
async fn new_files(dir: &Path, before: &[PathBuf]) -> crate::Result<Vec<PathBuf>> {
    let after = crate::utils::list_files(dir).await?;
    Ok(after.into_iter().filter(|p| !before.contains(p)).collect())
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, media: &Path) -> crate::Result<MediaInfo> {
        let output = self
            .run(
                &self.ffprobe_path,
                [
                    OsStr::new("-v"),
                    OsStr::new("error"),
                    OsStr::new("-show_entries"),
                    OsStr::new("format=duration"),
                    OsStr::new("-of"),
                    OsStr::new("default=noprint_wrappers=1:nokey=1"),
                    media.as_os_str(),
                ],
            )
            .await?;

        let duration_secs = parse_duration(&output.stdout).ok_or_else(|| {
            crate::Error::ExternalTool(format!(
                "ffprobe reported no duration for {}",
                media.display()
            ))
        })?;
        let size_bytes = tokio::fs::metadata(media).await?.len();

        Ok(MediaInfo {
            duration_secs,
            size_bytes,
        })
    }

    async fn remux(&self, input: &Path, output: &Path) -> crate::Result<()> {
        debug!(?input, ?output, "remuxing");
        self.run(
            &self.ffmpeg_path,
            [
                OsStr::new("-y"),
                OsStr::new("-hide_banner"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-i"),
                input.as_os_str(),
                OsStr::new("-map"),
                OsStr::new("0"),
                OsStr::new("-c"),
                OsStr::new("copy"),
                output.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn split(
        &self,
        input: &Path,
        out_dir: &Path,
        segment_secs: f64,
        stem: &str,
    ) -> crate::Result<Vec<PathBuf>> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let pattern = out_dir.join(format!("{stem}-%05d.{ext}"));
        let segment_time = format!("{segment_secs:.3}");
        let before = crate::utils::list_files(out_dir).await?;

        debug!(?input, segment_secs, ?pattern, "splitting");
        self.run(
            &self.ffmpeg_path,
            [
                OsStr::new("-y"),
                OsStr::new("-hide_banner"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-i"),
                input.as_os_str(),
                OsStr::new("-map"),
                OsStr::new("0"),
                OsStr::new("-c"),
                OsStr::new("copy"),
                OsStr::new("-f"),
                OsStr::new("segment"),
                OsStr::new("-segment_time"),
                OsStr::new(&segment_time),
                OsStr::new("-reset_timestamps"),
                OsStr::new("1"),
                pattern.as_os_str(),
            ],
        )
        .await?;

        new_files(out_dir, &before).await
    }

    async fn capture_to_file(&self, source_url: &str, output: &Path) -> crate::Result<()> {
        debug!(source_url, ?output, "capturing playlist");
        self.run(
            &self.ffmpeg_path,
            [
                OsStr::new("-y"),
                OsStr::new("-hide_banner"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-i"),
                OsStr::new(source_url),
                OsStr::new("-c"),
                OsStr::new("copy"),
                output.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn open_stream(&self, source_url: &str) -> crate::Result<CaptureStream> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-i", source_url])
            .args(["-c", "copy", "-f", "mpegts", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute ffmpeg: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            crate::Error::ExternalTool("ffmpeg stdout was not captured".to_string())
        })?;

        Ok(CaptureStream {
            reader: Box::new(stdout),
            child: Some(child),
        })
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_reads_first_line() {
        assert_eq!(parse_duration(b"123.456000\n"), Some(123.456));
        assert_eq!(parse_duration(b"  7\n"), Some(7.0));
        assert_eq!(parse_duration(b"N/A\n"), None);
        assert_eq!(parse_duration(b""), None);
        assert_eq!(parse_duration(b"-1\n"), None);
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = vec![b'a'; 2000];
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL);
        assert_eq!(stderr_tail(b"  boom \n"), "boom");
    }

    #[test]
    fn from_config_respects_disabled_path_search() {
        let tools = ToolsConfig {
            ffmpeg_path: None,
            ffprobe_path: None,
            search_path: false,
        };
        assert!(FfmpegTranscoder::from_config(&tools).is_none());

        let tools = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/opt/ff/ffmpeg")),
            ffprobe_path: Some(PathBuf::from("/opt/ff/ffprobe")),
            search_path: false,
        };
        let transcoder = FfmpegTranscoder::from_config(&tools).unwrap();
        assert_eq!(transcoder.ffmpeg_path, PathBuf::from("/opt/ff/ffmpeg"));
        assert_eq!(transcoder.ffprobe_path, PathBuf::from("/opt/ff/ffprobe"));
    }

    #[test]
    fn from_path_consistency_with_which_crate() {
        let both = which::which("ffmpeg").is_ok() && which::which("ffprobe").is_ok();
        assert_eq!(both, FfmpegTranscoder::from_path().is_some());
    }

    #[tokio::test]
    async fn probe_with_invalid_binary_path_is_external_tool_error() {
        let transcoder = FfmpegTranscoder::new(
            PathBuf::from("/nonexistent/path/to/ffmpeg"),
            PathBuf::from("/nonexistent/path/to/ffprobe"),
        );

        match transcoder.probe(Path::new("clip.mp4")).await {
            Err(crate::Error::ExternalTool(msg)) => {
                assert!(msg.contains("Failed to execute ffprobe"), "{msg}");
            }
            other => panic!("Expected ExternalTool error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn open_stream_with_invalid_binary_path_fails() {
        let transcoder = FfmpegTranscoder::new(
            PathBuf::from("/nonexistent/path/to/ffmpeg"),
            PathBuf::from("/nonexistent/path/to/ffprobe"),
        );

        let result = transcoder.open_stream("https://example.com/live.m3u8").await;
        assert!(matches!(result, Err(crate::Error::ExternalTool(_))));
    }

    #[tokio::test]
    #[ignore] // Requires ffprobe binary in PATH
    async fn probe_nonexistent_file_fails() {
        let Some(transcoder) = FfmpegTranscoder::from_path() else {
            println!("Skipping test: ffmpeg/ffprobe not found in PATH");
            return;
        };

        let result = transcoder
            .probe(Path::new("/tmp/nonexistent-media-ferry-file.mp4"))
            .await;
        assert!(result.is_err());
    }
}
