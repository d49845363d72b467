//! Test fixtures: pipelines wired to temp directories and generated payloads

use media_ferry::transcode::NoOpTranscoder;
use media_ferry::{Config, DirectorySink, MediaPipeline, RequestContext, DeliveryTarget};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A pipeline delivering into `<root>/out`, plus the directories it uses
pub struct TestPipeline {
    /// The pipeline under test
    pub pipeline: MediaPipeline,
    /// Keeps the directories alive for the duration of the test
    pub root: TempDir,
}

impl TestPipeline {
    /// Where the directory sink writes
    pub fn out_dir(&self) -> PathBuf {
        self.root.path().join("out")
    }

    /// Scratch root of the pipeline
    pub fn work_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    /// Where unsegmentable files are kept
    pub fn unsent_dir(&self) -> PathBuf {
        self.root.path().join("unsent")
    }
}

/// Config rooted in `root`, with short timeouts
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.acquisition.work_dir = root.join("work");
    config.delivery.unsent_dir = Some(root.join("unsent"));
    config.scheduler.capture_grace = Duration::from_millis(50);
    config.scheduler.shutdown_timeout = Duration::from_secs(10);
    config
}

/// Pipeline without ffmpeg, delivering to a [`DirectorySink`]
pub fn noop_pipeline() -> Result<TestPipeline, Box<dyn std::error::Error>> {
    noop_pipeline_with(|_| {})
}

/// Like [`noop_pipeline`], letting the caller adjust the config first
pub fn noop_pipeline_with(
    adjust: impl FnOnce(&mut Config),
) -> Result<TestPipeline, Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let mut config = test_config(root.path());
    adjust(&mut config);

    let sink = Arc::new(DirectorySink::new(root.path().join("out")));
    let pipeline = MediaPipeline::with_transcoder(config, sink, Arc::new(NoOpTranscoder))?;
    Ok(TestPipeline { pipeline, root })
}

/// Request context used by every test
pub fn test_context() -> RequestContext {
    RequestContext::new("tester", 100, DeliveryTarget::Reply)
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(17).wrapping_add(seed))
        .collect()
}

/// In-memory zip archive of `entries`
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options)?;
            writer.write_all(data)?;
        }
        writer.finish()?;
    }
    Ok(cursor.into_inner())
}
