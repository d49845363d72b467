//! Acquisition service
//!
//! Downloads a set of URLs into a fresh scratch directory. Each URL is routed by
//! shape: live playlists (`.m3u8`) are captured through the [`Transcoder`], every
//! other URL is streamed over HTTP. Downloads run concurrently up to the configured
//! connection cap and fail independently: a failed URL leaves no file behind and is
//! recorded in [`AcquisitionResult::failed`].

mod http;
mod live;

pub use live::{LiveCapture, LiveCaptureHandle};

use crate::config::AcquisitionConfig;
use crate::error::{AcquisitionError, Error, Result};
use crate::transcode::Transcoder;
use crate::utils::{ScratchDir, file_name_for_url, random_stem};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Manifest extensions that mark a live playlist
const PLAYLIST_EXTENSIONS: &[&str] = &["m3u8"];

/// Container used for captured playlists
const CAPTURE_EXTENSION: &str = "mp4";

/// Outcome of one acquisition batch
///
/// The directory is removed when the result (or the [`ScratchDir`] moved out of it)
/// is dropped.
#[derive(Debug)]
pub struct AcquisitionResult {
    /// Directory holding every file that downloaded successfully
    pub dir: ScratchDir,
    /// URLs that did not produce a file
    pub failed: BTreeSet<String>,
}

impl AcquisitionResult {
    /// Whether every requested URL produced a file
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Whether `url` points at a live playlist manifest rather than a single file
///
/// # Examples
///
/// ```
/// use media_ferry::acquisition::is_live_playlist;
///
/// assert!(is_live_playlist("https://cdn.example.com/live/index.m3u8?token=1"));
/// assert!(!is_live_playlist("https://cdn.example.com/clip.mp4"));
/// ```
pub fn is_live_playlist(url: &str) -> bool {
    crate::utils::url_extension(url)
        .is_some_and(|ext| PLAYLIST_EXTENSIONS.contains(&ext.as_str()))
}

/// Downloads URL sets into scratch directories
#[derive(Clone)]
pub struct Acquirer {
    client: reqwest::Client,
    transcoder: Arc<dyn Transcoder>,
    config: AcquisitionConfig,
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquirer")
            .field("transcoder", &self.transcoder.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Acquirer {
    /// Create an acquirer with its own connection pool
    ///
    /// The client has no request timeout so arbitrarily long downloads can finish.
    pub fn new(config: AcquisitionConfig, transcoder: Arc<dyn Transcoder>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;

        Ok(Self {
            client,
            transcoder,
            config,
        })
    }

    /// Root directory scratch directories are created in
    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Download every URL into a new scratch directory
    ///
    /// Only fails when the scratch directory cannot be created; individual URL
    /// failures are logged and listed in the result.
    pub async fn download<I, S>(&self, urls: I) -> Result<AcquisitionResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.as_ref().trim().to_string())
            .filter(|u| !u.is_empty() && seen.insert(u.clone()))
            .collect();

        let dir = ScratchDir::new_in(&self.config.work_dir, "dl")?;
        let started = Instant::now();
        let target = dir.path();

        let outcomes: Vec<(String, Result<PathBuf>)> = stream::iter(urls)
            .map(|url| async move {
                let outcome = self.fetch(&url, target).await;
                (url, outcome)
            })
            .buffer_unordered(self.config.max_connections.max(1))
            .collect()
            .await;

        let mut failed = BTreeSet::new();
        let mut downloaded = 0usize;
        for (url, outcome) in outcomes {
            match outcome {
                Ok(path) => {
                    debug!(url = %url, ?path, "downloaded");
                    downloaded += 1;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "download failed");
                    failed.insert(url);
                }
            }
        }

        info!(
            dir = ?dir.path(),
            downloaded,
            failed = failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "acquisition finished"
        );

        Ok(AcquisitionResult { dir, failed })
    }

    /// Fetch one URL into `dir`, removing any partial output on failure
    async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf> {
        if is_live_playlist(url) {
            let path = dir.join(format!("{}.{}", random_stem(), CAPTURE_EXTENSION));
            match self.transcoder.capture_to_file(url, &path).await {
                Ok(()) if path.exists() => Ok(path),
                Ok(()) => Err(AcquisitionError::Capture {
                    url: url.to_string(),
                    reason: "transcoder produced no output".to_string(),
                }
                .into()),
                Err(e) => {
                    discard(&path).await;
                    Err(AcquisitionError::Capture {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        } else {
            let path = dir.join(file_name_for_url(url, &self.config.fallback_extension));
            match http::stream_to_file(&self.client, url, &path).await {
                Ok(()) => Ok(path),
                Err(e) => {
                    discard(&path).await;
                    Err(e)
                }
            }
        }
    }
}

/// Remove a partial download if it exists
async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(?path, error = %e, "failed to remove partial download");
        }
    }
}
