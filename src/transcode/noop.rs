//! No-op transcoder for graceful degradation

use super::traits::{CaptureStream, Transcoder};
use crate::types::MediaInfo;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const MISSING: &str = "transcoding requires ffmpeg and ffprobe. \
                       Configure ffmpeg_path/ffprobe_path or ensure both are in PATH.";

/// Transcoder used when ffmpeg is unavailable
///
/// Direct downloads and delivery of files under the ceiling keep working;
/// every transcoding request fails with `Error::NotSupported`.
///
/// # Examples
///
/// ```
/// use media_ferry::transcode::{NoOpTranscoder, Transcoder};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() {
/// let transcoder = NoOpTranscoder;
/// assert!(transcoder.probe(Path::new("clip.mp4")).await.is_err());
/// # }
/// ```
pub struct NoOpTranscoder;

#[async_trait]
impl Transcoder for NoOpTranscoder {
    async fn probe(&self, _media: &Path) -> crate::Result<MediaInfo> {
        Err(crate::Error::NotSupported(MISSING.into()))
    }

    async fn remux(&self, _input: &Path, _output: &Path) -> crate::Result<()> {
        Err(crate::Error::NotSupported(MISSING.into()))
    }

    async fn split(
        &self,
        _input: &Path,
        _out_dir: &Path,
        _segment_secs: f64,
        _stem: &str,
    ) -> crate::Result<Vec<PathBuf>> {
        Err(crate::Error::NotSupported(MISSING.into()))
    }

    async fn capture_to_file(&self, _source_url: &str, _output: &Path) -> crate::Result<()> {
        Err(crate::Error::NotSupported(MISSING.into()))
    }

    async fn open_stream(&self, _source_url: &str) -> crate::Result<CaptureStream> {
        Err(crate::Error::NotSupported(MISSING.into()))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
