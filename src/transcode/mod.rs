//! External transcoding utility
//!
//! The pipeline never links a media library; it shells out to ffmpeg/ffprobe through
//! the [`Transcoder`] trait:
//!
//! - [`FfmpegTranscoder`]: runs the external binaries, stream-copying only
//! - [`NoOpTranscoder`]: stub used when the binaries are missing
//!
//! Subprocess calls carry no timeout; a hung ffmpeg holds its work unit until the
//! process exits.

mod cli;
mod noop;
mod traits;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod fake;

pub use cli::FfmpegTranscoder;
pub use noop::NoOpTranscoder;
pub use traits::{CaptureStream, Transcoder};

use crate::config::ToolsConfig;
use std::sync::Arc;

/// Pick the ffmpeg transcoder if it can be located, the no-op stub otherwise
pub fn from_config(tools: &ToolsConfig) -> Arc<dyn Transcoder> {
    match FfmpegTranscoder::from_config(tools) {
        Some(transcoder) => {
            tracing::info!(?transcoder, "using ffmpeg transcoder");
            Arc::new(transcoder)
        }
        None => {
            tracing::warn!(
                "ffmpeg/ffprobe not found, segmentation and playlist capture are disabled"
            );
            Arc::new(NoOpTranscoder)
        }
    }
}
