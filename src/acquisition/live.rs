//! Cooperative recording of live streams
//!
//! A [`LiveCapture`] copies the transcoder's output stream into a file until the
//! stream ends or it is asked to stop. Stopping is cooperative: the stop flag is
//! checked between reads, the file is flushed, and the subprocess is only released
//! after a grace period so buffered output can land.

use crate::error::{AcquisitionError, Result};
use crate::transcode::Transcoder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bytes read from the capture stream per iteration
const READ_CHUNK: usize = 64 * 1024;

/// A pending live recording
pub struct LiveCapture {
    url: String,
    output: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    grace: Duration,
    stop: CancellationToken,
}

impl LiveCapture {
    /// Prepare a recording of `url` into `output`
    pub fn new(
        url: impl Into<String>,
        output: impl Into<PathBuf>,
        transcoder: Arc<dyn Transcoder>,
        grace: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            output: output.into(),
            transcoder,
            grace,
            stop: CancellationToken::new(),
        }
    }

    /// Token that stops the recording when cancelled
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run the recording in a background task
    pub fn spawn(self) -> LiveCaptureHandle {
        let stop = self.stop_handle();
        let task = tokio::spawn(self.record());
        LiveCaptureHandle { stop, task }
    }

    /// Record until the stream ends or the stop flag is raised
    ///
    /// Returns the path of the recorded file. A stream that yields no bytes at all
    /// is an error and leaves no file behind.
    pub async fn record(self) -> Result<PathBuf> {
        let mut stream = self
            .transcoder
            .open_stream(&self.url)
            .await
            .map_err(|e| AcquisitionError::Capture {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        if let Some(parent) = self.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&self.output).await?;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut written = 0u64;

        info!(url = %self.url, output = ?self.output, "live capture started");

        let stopped = loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break true,
                read = stream.reader.read(&mut buf) => match read {
                    Ok(0) => break false,
                    Ok(n) => {
                        file.write_all(&buf[..n]).await?;
                        written += n as u64;
                    }
                    Err(e) => {
                        warn!(url = %self.url, error = %e, "live stream read failed");
                        break false;
                    }
                },
            }
        };
        file.flush().await?;
        drop(file);

        if stopped {
            debug!(url = %self.url, grace = ?self.grace, "stop requested, waiting before release");
            tokio::time::sleep(self.grace).await;
        }
        stream.release().await;

        if written == 0 {
            if let Err(e) = tokio::fs::remove_file(&self.output).await {
                warn!(output = ?self.output, error = %e, "failed to remove empty capture");
            }
            return Err(AcquisitionError::Capture {
                url: self.url,
                reason: "stream produced no data".to_string(),
            }
            .into());
        }

        info!(url = %self.url, bytes = written, stopped, "live capture finished");
        Ok(self.output)
    }
}

/// Handle to a recording running in the background
#[derive(Debug)]
pub struct LiveCaptureHandle {
    stop: CancellationToken,
    task: JoinHandle<Result<PathBuf>>,
}

impl LiveCaptureHandle {
    /// Ask the recording to stop
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the recording task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the recording and return the captured file
    pub async fn finish(self) -> Result<PathBuf> {
        self.task
            .await
            .map_err(|e| crate::Error::Other(format!("live capture task failed: {}", e)))?
    }

    /// Stop the recording and wait for the captured file
    pub async fn stop_and_finish(self) -> Result<PathBuf> {
        self.stop();
        self.finish().await
    }
}
