//! Delivery of finished artifacts
//!
//! [`DeliverySink`] is the seam to whatever transport carries batches to their
//! destination (a chat channel, an upload API, a directory). [`DeliveryBatcher`]
//! prepares a directory for it: archives are unpacked, oversized files segmented,
//! and the rest grouped into bounded batches.

mod batcher;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod recording;

pub use batcher::{DeliveryBatcher, batch_files};

use crate::error::Result;
use crate::types::{DestinationId, RequestContext};
use crate::utils::unique_path;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File name that [`DirectorySink`] appends notices to
pub const NOTICE_FILE: &str = "notices.log";

/// Transport that receives delivered batches
///
/// `send` is one atomic call per batch: either the whole batch reached the
/// destination or the call fails. Files are only read during the call; the
/// pipeline deletes them afterwards.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver one batch of files, in order
    async fn send(
        &self,
        files: &[PathBuf],
        destination: DestinationId,
        ctx: &RequestContext,
    ) -> Result<()>;

    /// Deliver a user-visible text notice (completion summaries, failures)
    async fn notify(
        &self,
        destination: DestinationId,
        ctx: &RequestContext,
        message: &str,
    ) -> Result<()>;
}

/// Sink that copies every batch into `<root>/<destination>/`
///
/// Notices are appended to `<root>/<destination>/notices.log`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Create a sink rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory a destination's files end up in
    pub fn destination_dir(&self, destination: DestinationId) -> PathBuf {
        self.root.join(destination.to_string())
    }

    async fn ensure_dir(&self, destination: DestinationId) -> Result<PathBuf> {
        let dir = self.destination_dir(destination);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

#[async_trait]
impl DeliverySink for DirectorySink {
    async fn send(
        &self,
        files: &[PathBuf],
        destination: DestinationId,
        ctx: &RequestContext,
    ) -> Result<()> {
        let dir = self.ensure_dir(destination).await?;
        for file in files {
            let name = file.file_name().unwrap_or(file.as_os_str());
            let target = unique_path(&dir.join(name))?;
            tokio::fs::copy(file, &target).await?;
            debug!(from = ?file, to = ?target, "copied");
        }
        info!(
            destination = %destination,
            channel = ctx.channel_id(),
            files = files.len(),
            "batch delivered to directory"
        );
        Ok(())
    }

    async fn notify(
        &self,
        destination: DestinationId,
        ctx: &RequestContext,
        message: &str,
    ) -> Result<()> {
        let dir = self.ensure_dir(destination).await?;
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(NOTICE_FILE))
            .await?;
        let line = format!("{} {}: {}\n", ctx.submitted_at.to_rfc3339(), ctx.requester, message);
        log.write_all(line.as_bytes()).await?;
        log.flush().await?;
        info!(destination = %destination, requester = %ctx.requester, message, "notice delivered");
        Ok(())
    }
}

/// Size of a file, for batching
pub(crate) async fn file_size(path: &Path) -> Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeliveryTarget;
    use tempfile::TempDir;

    #[tokio::test]
    async fn directory_sink_copies_without_clobbering() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let a = src.path().join("clip.mp4");
        std::fs::write(&a, b"first").unwrap();

        let sink = DirectorySink::new(out.path());
        let ctx = RequestContext::new("alice", 1, DeliveryTarget::Reply);
        let dest = DestinationId(9);

        sink.send(&[a.clone()], dest, &ctx).await.unwrap();
        std::fs::write(&a, b"second").unwrap();
        sink.send(&[a.clone()], dest, &ctx).await.unwrap();

        let dir = sink.destination_dir(dest);
        assert_eq!(std::fs::read(dir.join("clip.mp4")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.join("clip (1).mp4")).unwrap(), b"second");
        assert!(a.exists());
    }

    #[tokio::test]
    async fn directory_sink_appends_notices() {
        let out = TempDir::new().unwrap();
        let sink = DirectorySink::new(out.path());
        let ctx = RequestContext::new("alice", 1, DeliveryTarget::Reply);

        sink.notify(DestinationId(3), &ctx, "first").await.unwrap();
        sink.notify(DestinationId(3), &ctx, "second").await.unwrap();

        let log = std::fs::read_to_string(out.path().join("3").join(NOTICE_FILE)).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("alice: first"));
        assert!(lines[1].ends_with("alice: second"));
    }
}
