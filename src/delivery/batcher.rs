use super::{DeliverySink, file_size};
use crate::config::DeliveryConfig;
use crate::error::Result;
use crate::extraction::{extract_archive_async, is_archive};
use crate::segmenter::{SegmentSet, Segmenter};
use crate::types::{DeliveryReport, DestinationId, Event, RequestContext};
use crate::utils::{ScratchDir, list_files, move_file, unique_path};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Group `(file, size)` pairs into batches of at most `batch_size` files and
/// `max_batch_bytes` cumulative bytes, keeping their order
///
/// A single file larger than `max_batch_bytes` still gets a batch of its own.
///
/// # Examples
///
/// ```
/// use media_ferry::delivery::batch_files;
/// use std::path::PathBuf;
///
/// let files: Vec<(PathBuf, u64)> = (0..5)
///     .map(|i| (PathBuf::from(format!("{i}.mp4")), 10))
///     .collect();
///
/// let batches = batch_files(files, 2, 100);
/// assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
/// ```
pub fn batch_files(
    files: Vec<(PathBuf, u64)>,
    batch_size: usize,
    max_batch_bytes: u64,
) -> Vec<Vec<PathBuf>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<PathBuf> = Vec::new();
    let mut current_bytes = 0u64;

    for (path, size) in files {
        let full = current.len() >= batch_size;
        let too_big = !current.is_empty() && current_bytes.saturating_add(size) > max_batch_bytes;
        if full || too_big {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.push(path);
        current_bytes = current_bytes.saturating_add(size);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Routes a directory's contents to a [`DeliverySink`]
///
/// Every entry takes one of three paths:
/// - archives are unpacked into a scratch directory and routed again
/// - files over the ceiling are segmented and their parts routed again
/// - everything else is sent in batches, in name order (segment parts in
///   playback order)
///
/// A failure while handling one entry is logged and recorded in the report; the
/// remaining entries are still delivered. The routed directory is removed once
/// all of its entries have been handled.
pub struct DeliveryBatcher {
    sink: Arc<dyn DeliverySink>,
    segmenter: Segmenter,
    config: DeliveryConfig,
    scratch_root: PathBuf,
    events: Option<broadcast::Sender<Event>>,
}

impl DeliveryBatcher {
    /// Create a batcher that places its scratch directories under `scratch_root`
    pub fn new(
        sink: Arc<dyn DeliverySink>,
        segmenter: Segmenter,
        config: &DeliveryConfig,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sink,
            segmenter,
            config: config.clone(),
            scratch_root: scratch_root.into(),
            events: None,
        }
    }

    /// Publish batch and segmentation events on `events`
    pub fn with_events(mut self, events: broadcast::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Deliver everything in `dir`, then remove it
    pub async fn deliver(
        &self,
        dir: ScratchDir,
        max_size_bytes: u64,
        destination: DestinationId,
        ctx: &RequestContext,
    ) -> Result<DeliveryReport> {
        let entries = list_files(dir.path()).await?;
        let report = self
            .route(dir, entries, max_size_bytes, destination, ctx, 0)
            .await;
        info!(
            destination = %destination,
            batches = report.batches_sent,
            failed_batches = report.batches_failed,
            files = report.files_sent,
            unsent = report.unsent.len(),
            errors = report.errors.len(),
            "delivery finished"
        );
        Ok(report)
    }

    /// Deliver a single file or every file below a directory
    ///
    /// The content is moved into a scratch directory first, so `path` no longer
    /// exists afterwards.
    pub async fn deliver_path(
        &self,
        path: &Path,
        max_size_bytes: u64,
        destination: DestinationId,
        ctx: &RequestContext,
    ) -> Result<DeliveryReport> {
        let scratch = ScratchDir::new_in(&self.scratch_root, "in")?;

        if tokio::fs::metadata(path).await?.is_dir() {
            let source = path.to_path_buf();
            tokio::task::spawn_blocking(move || crate::utils::flatten_dir(&source))
                .await
                .map_err(|e| crate::Error::Other(format!("flatten task failed: {}", e)))??;
            for file in list_files(path).await? {
                if let Some(name) = file.file_name() {
                    move_file(&file, &scratch.path().join(name)).await?;
                }
            }
            tokio::fs::remove_dir(path).await?;
        } else {
            let name = path
                .file_name()
                .ok_or_else(|| crate::Error::Other(format!("not a file: {}", path.display())))?;
            move_file(path, &scratch.path().join(name)).await?;
        }

        self.deliver(scratch, max_size_bytes, destination, ctx).await
    }

    fn route<'a>(
        &'a self,
        dir: ScratchDir,
        entries: Vec<PathBuf>,
        max_size_bytes: u64,
        destination: DestinationId,
        ctx: &'a RequestContext,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = DeliveryReport> + Send + 'a>> {
        Box::pin(async move {
            let mut report = DeliveryReport::default();
            let mut plain: Vec<(PathBuf, u64)> = Vec::new();

            for path in entries {
                if let Err(e) = self
                    .route_entry(&path, max_size_bytes, destination, ctx, depth, &mut plain, &mut report)
                    .await
                {
                    warn!(file = ?path, error = %e, "routing failed, continuing with the rest");
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }

            let cap = self.config.max_batch_bytes.unwrap_or(max_size_bytes);
            for batch in batch_files(plain, self.config.batch_size, cap) {
                self.send_batch(&batch, destination, ctx, &mut report).await;
            }

            let dir_path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(dir = ?dir_path, error = %e, "failed to remove scratch directory");
            }
            report
        })
    }

    /// Handle one entry of a routed directory
    ///
    /// Files that fit are collected into `plain`; archives and oversized files are
    /// resolved into nested passes whose results are merged into `report`.
    #[allow(clippy::too_many_arguments)]
    async fn route_entry(
        &self,
        path: &Path,
        max_size_bytes: u64,
        destination: DestinationId,
        ctx: &RequestContext,
        depth: u32,
        plain: &mut Vec<(PathBuf, u64)>,
        report: &mut DeliveryReport,
    ) -> Result<()> {
        if depth < self.config.max_archive_depth && is_archive(path, &self.config.archive_extensions) {
            match self.unpack(path).await {
                Ok(unpacked) => match list_files(unpacked.path()).await {
                    Ok(entries) => {
                        report.archives_unpacked += 1;
                        if let Err(e) = tokio::fs::remove_file(path).await {
                            warn!(archive = ?path, error = %e, "failed to remove unpacked archive");
                        }
                        let nested = self
                            .route(unpacked, entries, max_size_bytes, destination, ctx, depth + 1)
                            .await;
                        report.merge(nested);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(archive = ?path, error = %e, "unpacked archive unreadable, delivering archive as is");
                    }
                },
                Err(e) => {
                    warn!(archive = ?path, error = %e, "unpacking failed, delivering archive as is");
                }
            }
        }

        self.collect(path, max_size_bytes, destination, ctx, depth, plain, report).await
    }

    /// Queue a file for batching, segmenting it first when it exceeds the ceiling
    #[allow(clippy::too_many_arguments)]
    async fn collect(
        &self,
        path: &Path,
        max_size_bytes: u64,
        destination: DestinationId,
        ctx: &RequestContext,
        depth: u32,
        plain: &mut Vec<(PathBuf, u64)>,
        report: &mut DeliveryReport,
    ) -> Result<()> {
        let size = file_size(path).await?;
        if size <= max_size_bytes {
            plain.push((path.to_path_buf(), size));
            return Ok(());
        }

        match self
            .segmenter
            .segment(path, max_size_bytes, &self.scratch_root)
            .await
        {
            Ok(SegmentSet { dir, parts }) => {
                report.files_segmented += 1;
                self.emit(Event::Segmented {
                    file: path.to_path_buf(),
                    parts: parts.len(),
                });
                // parts go out in playback order, not name order
                let nested = self
                    .route(dir, parts, max_size_bytes, destination, ctx, depth)
                    .await;
                report.merge(nested);
            }
            Err(e) => {
                warn!(file = ?path, size, ceiling = max_size_bytes, error = %e, "file cannot be segmented");
                report.unsent.push(self.retain_unsent(path).await);
            }
        }
        Ok(())
    }

    async fn unpack(&self, archive: &Path) -> Result<ScratchDir> {
        let scratch = ScratchDir::new_in(&self.scratch_root, "x")?;
        extract_archive_async(archive, scratch.path()).await?;
        Ok(scratch)
    }

    async fn send_batch(
        &self,
        batch: &[PathBuf],
        destination: DestinationId,
        ctx: &RequestContext,
        report: &mut DeliveryReport,
    ) {
        let mut bytes = 0u64;
        for file in batch {
            bytes += file_size(file).await.unwrap_or(0);
        }

        match self.sink.send(batch, destination, ctx).await {
            Ok(()) => {
                debug!(destination = %destination, files = batch.len(), bytes, "batch sent");
                report.batches_sent += 1;
                report.files_sent += batch.len();
                self.emit(Event::BatchDelivered {
                    destination,
                    files: batch.len(),
                    bytes,
                });
            }
            Err(e) => {
                warn!(destination = %destination, files = batch.len(), error = %e, "batch delivery failed");
                report.batches_failed += 1;
                self.emit(Event::BatchFailed {
                    destination,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Move a file that could not be delivered out of its scratch directory
    ///
    /// Returns where the file now lives. Without an unsent directory the file is
    /// left to be removed with its scratch directory.
    async fn retain_unsent(&self, path: &Path) -> PathBuf {
        let Some(unsent_dir) = &self.config.unsent_dir else {
            return path.to_path_buf();
        };

        let moved = async {
            tokio::fs::create_dir_all(unsent_dir).await?;
            let name = path.file_name().unwrap_or(path.as_os_str());
            let target = unique_path(&unsent_dir.join(name))?;
            move_file(path, &target).await?;
            Ok::<_, crate::Error>(target)
        }
        .await;

        match moved {
            Ok(target) => {
                info!(file = ?path, kept = ?target, "kept undeliverable file");
                target
            }
            Err(e) => {
                warn!(file = ?path, error = %e, "failed to keep undeliverable file");
                path.to_path_buf()
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            // no subscribers is fine
            events.send(event).ok();
        }
    }
}
