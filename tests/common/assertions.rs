//! Custom test assertions for integration tests

use media_ferry::{DestinationId, Event, MediaPipeline};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wait for the destination's worker to drain, returning `(completed, failed)`
///
/// Returns `None` on timeout or when the channel closes.
pub async fn wait_for_drain(
    events: &mut broadcast::Receiver<Event>,
    destination: DestinationId,
    timeout: Duration,
) -> Option<(usize, usize)> {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Drained {
                    destination: drained,
                    completed,
                    failed,
                }) if drained == destination => return Some((completed, failed)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Wait until the pipeline has no queued or running work
pub async fn wait_idle(pipeline: &MediaPipeline, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, pipeline.wait_idle())
        .await
        .is_ok()
}

/// Every regular file below `dir`, sorted
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Assert that no scratch directory is left below `work_dir`
pub fn assert_no_scratch_left(work_dir: &Path) {
    let leftovers: Vec<PathBuf> = std::fs::read_dir(work_dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    assert!(
        leftovers.is_empty(),
        "scratch directories left behind: {:?}",
        leftovers
    );
}
