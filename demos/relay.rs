//! Relay example
//!
//! Downloads every URL given on the command line, splits anything above the size
//! ceiling and copies the result into `./out/<destination>/`.
//!
//! ```bash
//! cargo run --example relay -- https://cdn.example.com/clip.mp4 https://terabox.com/s/1abc
//! ```
//!
//! Environment:
//! - `FERRY_MAX_BYTES` - per-file ceiling (default: 25 MiB)
//! - `FERRY_DESTINATION` - destination id (default: 1)
//! - `RUST_LOG` - log filter (default: info)

use media_ferry::{
    Config, DeliveryTarget, DestinationId, DirectorySink, Event, MediaPipeline, RequestContext,
};
use std::sync::Arc;

const DEFAULT_MAX_BYTES: u64 = 25 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: relay <url>...");
        std::process::exit(2);
    }

    let max_bytes = std::env::var("FERRY_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_BYTES);
    let destination: DestinationId = std::env::var("FERRY_DESTINATION")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DestinationId(1));

    let sink = Arc::new(DirectorySink::new("./out"));
    let pipeline = MediaPipeline::new(Config::default(), sink)?;

    // Progress subscriber
    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Acquired {
                    downloaded, failed, ..
                } => {
                    println!("downloaded {} file(s), {} failed", downloaded, failed.len());
                }
                Event::Segmented { file, parts } => {
                    println!("split {:?} into {} part(s)", file, parts);
                }
                Event::BatchDelivered { files, bytes, .. } => {
                    println!("delivered {} file(s), {:.2} MB", files, bytes as f64 / 1_048_576.0);
                }
                Event::BatchFailed { error, .. } => println!("batch failed: {}", error),
                Event::Drained { .. } => println!("all done"),
                _ => {}
            }
        }
    });

    let ctx = RequestContext::new("relay", 0, DeliveryTarget::Reply);
    let units = pipeline.submit(&urls, destination, max_bytes, ctx).await?;
    println!("queued {} work unit(s) for destination {}", units, destination);

    pipeline.wait_idle().await;
    pipeline.shutdown().await?;
    Ok(())
}
