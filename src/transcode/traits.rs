//! Traits and types for the external transcoding utility

use crate::types::MediaInfo;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio::process::Child;

/// A live byte stream produced by the transcoder
///
/// The reader yields the remuxed stream; `child` is the subprocess backing it, if any.
/// Dropping the stream kills the subprocess.
pub struct CaptureStream {
    /// Stream of container bytes
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Subprocess producing the bytes
    pub child: Option<Child>,
}

impl CaptureStream {
    /// Stream backed by an in-process reader
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
        }
    }

    /// Kill the backing subprocess (if any) and reap it
    pub async fn release(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "capture subprocess already exited");
            }
        }
    }
}

/// Trait for the transcoding utility the pipeline shells out to
///
/// Implementations consume one input (file or URL) and produce zero or more output files,
/// returning an error on any non-zero exit. The segmenter and the acquisition
/// service only talk to this trait, so tests can substitute an in-memory fake.
///
/// # Examples
///
/// ```no_run
/// use media_ferry::transcode::{FfmpegTranscoder, Transcoder};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transcoder = FfmpegTranscoder::from_path()
///     .expect("ffmpeg not found");
///
/// let info = transcoder.probe(Path::new("clip.mp4")).await?;
/// println!("{} seconds, {} bytes", info.duration_secs, info.size_bytes);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Read duration and size of a media file
    async fn probe(&self, media: &Path) -> crate::Result<MediaInfo>;

    /// Stream-copy `input` into `output`, rewriting container timestamps
    async fn remux(&self, input: &Path, output: &Path) -> crate::Result<()>;

    /// Cut `input` into parts of about `segment_secs` seconds
    ///
    /// Parts are written to `out_dir` as `<stem>-NNN.<ext>` where `ext` is the
    /// extension of `input`. Returns the newly created parts, sorted by name.
    async fn split(
        &self,
        input: &Path,
        out_dir: &Path,
        segment_secs: f64,
        stem: &str,
    ) -> crate::Result<Vec<PathBuf>>;

    /// Capture a live playlist into a single file, returning once the stream ends
    async fn capture_to_file(&self, source_url: &str, output: &Path) -> crate::Result<()>;

    /// Open a live playlist as a byte stream for cooperative recording
    async fn open_stream(&self, source_url: &str) -> crate::Result<CaptureStream>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
