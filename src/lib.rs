//! # media-ferry
//!
//! Media acquisition, size-constrained segmentation and batched delivery.
//!
//! ## Overview
//!
//! A submission is a list of URLs bound for a destination:
//! - **Resolution** - share links are turned into direct download links
//! - **Acquisition** - files are fetched over HTTP, live playlists captured with ffmpeg
//! - **Segmentation** - anything above the destination's size ceiling is split
//! - **Delivery** - archives are unpacked and files handed to a [`delivery::DeliverySink`] in batches
//!
//! Work for one destination runs strictly in submission order; different
//! destinations proceed concurrently.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_ferry::{Config, MediaPipeline};
//! use media_ferry::delivery::DirectorySink;
//! use media_ferry::types::{DeliveryTarget, DestinationId, RequestContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = MediaPipeline::new(Config::default(), Arc::new(DirectorySink::new("./out")))?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let ctx = RequestContext::new("someone", 1, DeliveryTarget::Reply);
//!     pipeline
//!         .submit(["https://cdn.example.com/clip.mp4"], DestinationId(1), 25 * 1024 * 1024, ctx)
//!         .await?;
//!
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// URL acquisition (HTTP downloads and live captures)
pub mod acquisition;
/// Configuration types
pub mod config;
/// Batching and delivery to sinks
pub mod delivery;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Pipeline entry point
pub mod pipeline;
/// Share link resolution
pub mod resolver;
/// Per-destination FIFO scheduling
pub mod scheduler;
/// Size-constrained segmentation
pub mod segmenter;
/// ffmpeg abstraction
pub mod transcode;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DeliveryMode};
pub use delivery::{DeliveryBatcher, DeliverySink, DirectorySink};
pub use error::{
    AcquisitionError, DeliveryError, Error, ResolveError, Result, SegmentError,
};
pub use pipeline::{LiveRecording, MediaPipeline};
pub use scheduler::{DestinationScheduler, WorkUnit};
pub use segmenter::{SegmentSet, Segmenter};
pub use transcode::{FfmpegTranscoder, NoOpTranscoder, Transcoder};
pub use types::{
    DeliveryReport, DeliveryTarget, DestinationId, Event, MediaInfo, RequestContext, ResolvedLink,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_ferry::{Config, DirectorySink, MediaPipeline, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = MediaPipeline::new(Config::default(), Arc::new(DirectorySink::new("./out")))?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(pipeline).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: MediaPipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "shutdown signal received");
        }
        // containers and test harnesses may refuse one of the handlers
        (sigterm, sigint) => match sigterm.or(sigint) {
            Ok(mut remaining) => {
                tracing::warn!("only one signal handler registered");
                remaining.recv().await;
                tracing::info!("shutdown signal received");
            }
            Err(e) => {
                tracing::error!(error = %e, "no signal handlers registered, falling back to ctrl_c");
                tokio::signal::ctrl_c().await.ok();
            }
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Ctrl+C received");
}
