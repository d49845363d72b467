//! In-process transcoder for tests.
//!
//! Treats every file as constant-bitrate raw bytes: duration is `size / bytes_per_sec`
//! and splitting slices the byte stream, so concatenating the parts reproduces the
//! source exactly.

use super::traits::{CaptureStream, Transcoder};
use crate::types::MediaInfo;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub(crate) struct FakeTranscoder {
    pub(crate) bytes_per_sec: f64,
    /// Smallest part the fake can cut (keyframe spacing)
    pub(crate) granularity: u64,
    /// First split call cuts parts this many times larger than asked (bitrate spike)
    pub(crate) first_split_factor: f64,
    pub(crate) fail_remux: bool,
    pub(crate) fail_split: bool,
    /// `split` exits cleanly without writing anything
    pub(crate) silent_split: bool,
    /// Bytes written by `capture_to_file`
    pub(crate) capture_payload: Vec<u8>,
    /// URLs for which capture fails
    pub(crate) failing_urls: Vec<String>,
    /// Chunk size and interval of the endless live stream; `None` makes it finite
    pub(crate) live_chunk: Option<(usize, Duration)>,
    pub(crate) split_calls: AtomicUsize,
    pub(crate) captured: Mutex<Vec<String>>,
}

impl Default for FakeTranscoder {
    fn default() -> Self {
        Self {
            bytes_per_sec: 1000.0,
            granularity: 1,
            first_split_factor: 1.0,
            fail_remux: false,
            fail_split: false,
            silent_split: false,
            capture_payload: b"captured-stream".to_vec(),
            failing_urls: Vec::new(),
            live_chunk: Some((256, Duration::from_millis(2))),
            split_calls: AtomicUsize::new(0),
            captured: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTranscoder {
    pub(crate) fn split_calls(&self) -> usize {
        self.split_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, media: &Path) -> crate::Result<MediaInfo> {
        let size_bytes = tokio::fs::metadata(media).await?.len();
        Ok(MediaInfo {
            duration_secs: size_bytes as f64 / self.bytes_per_sec,
            size_bytes,
        })
    }

    async fn remux(&self, input: &Path, output: &Path) -> crate::Result<()> {
        if self.fail_remux {
            tokio::fs::write(output, b"partial").await?;
            return Err(crate::Error::ExternalTool("remux exited with 1".into()));
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn split(
        &self,
        input: &Path,
        out_dir: &Path,
        segment_secs: f64,
        stem: &str,
    ) -> crate::Result<Vec<PathBuf>> {
        let call = self.split_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_split {
            return Err(crate::Error::ExternalTool("split exited with 1".into()));
        }
        if self.silent_split {
            return Ok(Vec::new());
        }

        let factor = if call == 0 {
            self.first_split_factor
        } else {
            1.0
        };
        let data = tokio::fs::read(input).await?;
        let chunk = ((segment_secs * self.bytes_per_sec * factor) as u64)
            .max(self.granularity)
            .max(1) as usize;
        let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("mp4");

        let mut parts = Vec::new();
        for (i, piece) in data.chunks(chunk).enumerate() {
            let part = out_dir.join(format!("{stem}-{i:05}.{ext}"));
            tokio::fs::write(&part, piece).await?;
            parts.push(part);
        }
        Ok(parts)
    }

    async fn capture_to_file(&self, source_url: &str, output: &Path) -> crate::Result<()> {
        self.captured
            .lock()
            .expect("capture log poisoned")
            .push(source_url.to_string());
        if self.failing_urls.iter().any(|u| u == source_url) {
            tokio::fs::write(output, b"half").await?;
            return Err(crate::Error::ExternalTool("capture exited with 1".into()));
        }
        tokio::fs::write(output, &self.capture_payload).await?;
        Ok(())
    }

    async fn open_stream(&self, source_url: &str) -> crate::Result<CaptureStream> {
        if self.failing_urls.iter().any(|u| u == source_url) {
            return Err(crate::Error::ExternalTool("stream unavailable".into()));
        }
        match self.live_chunk {
            None => Ok(CaptureStream::from_reader(std::io::Cursor::new(
                self.capture_payload.clone(),
            ))),
            Some((size, interval)) => {
                let (mut tx, rx) = tokio::io::duplex(size * 4);
                tokio::spawn(async move {
                    let chunk = vec![b'x'; size];
                    while tx.write_all(&chunk).await.is_ok() {
                        tokio::time::sleep(interval).await;
                    }
                });
                Ok(CaptureStream::from_reader(rx))
            }
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
