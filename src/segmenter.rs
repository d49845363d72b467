//! Size-constrained segmentation
//!
//! Splits one media file into parts no larger than a byte ceiling. The first split
//! assumes a constant bitrate and cuts at `duration / size * ceiling` seconds; any
//! part that still ends up at or above the ceiling is cut again at half of its
//! previous target. Refinement is a worklist with a fixed number of rounds, so a
//! pathological bitrate spike ends in [`SegmentError::CannotFit`] instead of an
//! endless loop.
//!
//! Content is never lost: a part is only deleted once the parts replacing it exist,
//! and the source is only deleted once every part fits. On any error the source file
//! is left where it was.

use crate::config::SegmentConfig;
use crate::error::{Result, SegmentError};
use crate::transcode::Transcoder;
use crate::utils::{ScratchDir, random_stem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parts produced from one source file
///
/// Every part is strictly smaller than the ceiling it was produced for. The
/// directory is removed when the set is dropped.
#[derive(Debug)]
pub struct SegmentSet {
    /// Directory holding the parts
    pub dir: ScratchDir,
    /// Parts in playback order
    pub parts: Vec<PathBuf>,
}

/// Splits oversized media files through a [`Transcoder`]
#[derive(Clone)]
pub struct Segmenter {
    transcoder: Arc<dyn Transcoder>,
    config: SegmentConfig,
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("transcoder", &self.transcoder.name())
            .field("config", &self.config)
            .finish()
    }
}

/// One part waiting to be checked against the ceiling
struct Pending {
    path: PathBuf,
    /// Segment duration that produced this part
    target_secs: f64,
    /// Halving rounds already spent on this lineage
    round: u32,
}

impl Segmenter {
    /// Create a segmenter
    pub fn new(transcoder: Arc<dyn Transcoder>, config: &SegmentConfig) -> Self {
        Self {
            transcoder,
            config: config.clone(),
        }
    }

    /// Split `file` into parts smaller than `max_size_bytes` inside a scratch
    /// directory under `save_dir`
    ///
    /// On success the source file has been deleted. On error it is still present
    /// and the scratch directory is gone.
    pub async fn segment(
        &self,
        file: &Path,
        max_size_bytes: u64,
        save_dir: &Path,
    ) -> Result<SegmentSet> {
        let size = tokio::fs::metadata(file).await?.len();
        if size <= max_size_bytes {
            return Err(SegmentError::AlreadyWithinCeiling {
                file: file.to_path_buf(),
                size,
                ceiling: max_size_bytes,
            }
            .into());
        }

        self.sanitize(file).await?;

        let info = self
            .transcoder
            .probe(file)
            .await
            .map_err(|e| SegmentError::ProbeFailed {
                file: file.to_path_buf(),
                reason: e.to_string(),
            })?;

        let initial_secs = if info.size_bytes == 0 {
            0.0
        } else {
            info.duration_secs / info.size_bytes as f64 * max_size_bytes as f64
        };
        if !initial_secs.is_finite() || initial_secs < self.config.min_segment_secs {
            return Err(SegmentError::CeilingTooSmall {
                file: file.to_path_buf(),
                ceiling: max_size_bytes,
            }
            .into());
        }

        let dir = ScratchDir::new_in(save_dir, "seg")?;
        let stem = random_stem();
        info!(
            ?file,
            size = info.size_bytes,
            duration = info.duration_secs,
            ceiling = max_size_bytes,
            segment_secs = initial_secs,
            "segmenting"
        );

        let first = self.split(file, dir.path(), initial_secs, &stem).await?;
        if first.is_empty() {
            return Err(SegmentError::ToolFailed {
                file: file.to_path_buf(),
                reason: "split produced no parts".to_string(),
            }
            .into());
        }
        let mut worklist: Vec<Pending> = first
            .into_iter()
            .rev()
            .map(|path| Pending {
                path,
                target_secs: initial_secs,
                round: 0,
            })
            .collect();

        // LIFO with reversed pushes keeps `fitted` in playback order.
        let mut fitted: Vec<PathBuf> = Vec::new();
        while let Some(part) = worklist.pop() {
            let part_size = tokio::fs::metadata(&part.path).await?.len();
            if part_size < max_size_bytes {
                fitted.push(part.path);
                continue;
            }

            let round = part.round + 1;
            let part_info =
                self.transcoder
                    .probe(&part.path)
                    .await
                    .map_err(|e| SegmentError::ProbeFailed {
                        file: part.path.clone(),
                        reason: e.to_string(),
                    })?;
            let target = (part.target_secs / 2.0).min(part_info.duration_secs / 2.0);

            if round > self.config.max_halving_rounds || target < self.config.min_segment_secs {
                warn!(
                    ?file,
                    part = ?part.path,
                    part_size,
                    round,
                    target,
                    "part still exceeds ceiling, giving up"
                );
                return Err(SegmentError::CannotFit {
                    file: file.to_path_buf(),
                    ceiling: max_size_bytes,
                    rounds: round - 1,
                }
                .into());
            }

            debug!(part = ?part.path, part_size, target, round, "re-splitting oversized part");
            let sub_stem = part
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(random_stem);
            let pieces = self.split(&part.path, dir.path(), target, &sub_stem).await?;
            if pieces.is_empty() {
                return Err(SegmentError::ToolFailed {
                    file: part.path.clone(),
                    reason: "split produced no parts".to_string(),
                }
                .into());
            }

            tokio::fs::remove_file(&part.path).await?;
            worklist.extend(pieces.into_iter().rev().map(|path| Pending {
                path,
                target_secs: target,
                round,
            }));
        }

        // the source may only go once its content lives on in the parts
        if fitted.is_empty() {
            return Err(SegmentError::ToolFailed {
                file: file.to_path_buf(),
                reason: "no parts left after refinement".to_string(),
            }
            .into());
        }
        tokio::fs::remove_file(file).await?;
        info!(?file, parts = fitted.len(), "segmentation finished");

        Ok(SegmentSet { dir, parts: fitted })
    }

    /// Remux in place so duration metadata is reliable
    async fn sanitize(&self, file: &Path) -> Result<()> {
        let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        let temp = file.with_file_name(format!(".{}.remux.{}", random_stem(), ext));

        if let Err(e) = self.transcoder.remux(file, &temp).await {
            remove_quietly(&temp).await;
            return Err(SegmentError::ToolFailed {
                file: file.to_path_buf(),
                reason: e.to_string(),
            }
            .into());
        }

        if let Err(e) = tokio::fs::rename(&temp, file).await {
            remove_quietly(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn split(
        &self,
        input: &Path,
        out_dir: &Path,
        secs: f64,
        stem: &str,
    ) -> Result<Vec<PathBuf>> {
        self.transcoder
            .split(input, out_dir, secs, stem)
            .await
            .map_err(|e| {
                SegmentError::ToolFailed {
                    file: input.to_path_buf(),
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(?path, error = %e, "failed to remove temporary file");
        }
    }
}
