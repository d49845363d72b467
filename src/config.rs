//! Configuration types for media-ferry

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Acquisition settings (working directory, connection pool, client identity)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Root under which every scratch directory is created (default: "./work")
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Maximum concurrent downloads per batch (default: 5)
    #[serde(default = "default_download_connections")]
    pub max_connections: usize,

    /// User-Agent header sent with every fetch (default: "Magic Browser")
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Extension used when a URL path carries none (default: "mp4")
    #[serde(default = "default_fallback_extension")]
    pub fallback_extension: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            max_connections: default_download_connections(),
            user_agent: default_user_agent(),
            fallback_extension: default_fallback_extension(),
        }
    }
}

/// Link resolution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Resolution endpoint receiving a form-encoded `url` field
    #[serde(default = "default_resolver_endpoint")]
    pub endpoint: String,

    /// URL prefixes that must be resolved before they can be fetched
    #[serde(default = "default_resolvable_prefixes")]
    pub resolvable_prefixes: Vec<String>,

    /// Maximum concurrent resolution requests (default: 10)
    #[serde(default = "default_resolver_connections")]
    pub max_connections: usize,

    /// User-Agent header sent to the endpoint
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_resolver_endpoint(),
            resolvable_prefixes: default_resolvable_prefixes(),
            max_connections: default_resolver_connections(),
            user_agent: default_user_agent(),
        }
    }
}

impl ResolverConfig {
    /// Whether `url` has to go through the resolver
    pub fn is_resolvable(&self, url: &str) -> bool {
        self.resolvable_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }
}

/// Segmentation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Maximum number of halving rounds before giving up (default: 8)
    #[serde(default = "default_max_halving_rounds")]
    pub max_halving_rounds: u32,

    /// Shortest segment duration worth asking the transcoder for, in seconds (default: 1.0)
    #[serde(default = "default_min_segment_secs")]
    pub min_segment_secs: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_halving_rounds: default_max_halving_rounds(),
            min_segment_secs: default_min_segment_secs(),
        }
    }
}

/// Delivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of files per delivery call (default: 8)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Transport cap on the cumulative size of one batch.
    /// `None` uses the per-artifact ceiling of the request.
    #[serde(default)]
    pub max_batch_bytes: Option<u64>,

    /// Extensions treated as archives (default: zip, 7z)
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// How deep archives inside archives are unpacked (default: 3)
    #[serde(default = "default_max_archive_depth")]
    pub max_archive_depth: u32,

    /// Where files that could not be segmented are moved before their scratch
    /// directory is removed (default: "./unsent"). `None` discards them.
    #[serde(default = "default_unsent_dir")]
    pub unsent_dir: Option<PathBuf>,

    /// Whether delivery runs inside the work unit or is spawned alongside it
    #[serde(default)]
    pub mode: DeliveryMode,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batch_bytes: None,
            archive_extensions: default_archive_extensions(),
            max_archive_depth: default_max_archive_depth(),
            unsent_dir: default_unsent_dir(),
            mode: DeliveryMode::default(),
        }
    }
}

/// Delivery mode for acquired groups
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// The unit waits for its delivery before the next unit of the destination starts
    #[default]
    Sequential,
    /// Delivery is spawned and the next acquisition starts right away
    Concurrent,
}

/// External tool paths (ffmpeg, ffprobe)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to ffprobe executable (auto-detected if None)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            search_path: true,
        }
    }
}

/// Scheduling, grouping and lifecycle settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of URLs acquired together as one work unit (default: 10)
    #[serde(default = "default_url_group_limit")]
    pub url_group_limit: usize,

    /// Delay between stopping a live capture and releasing its subprocess (default: 5s)
    #[serde(default = "default_capture_grace", with = "duration_serde")]
    pub capture_grace: Duration,

    /// How long shutdown waits for destination workers to drain (default: 30s)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            url_group_limit: default_url_group_limit(),
            capture_grace: default_capture_grace(),
            shutdown_timeout: default_shutdown_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Main configuration for [`crate::MediaPipeline`]
///
/// Every section has defaults, so `Config::default()` is a working setup as long
/// as ffmpeg is on PATH.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Link resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Segmentation settings
    #[serde(default)]
    pub segment: SegmentConfig,

    /// Delivery batching settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Scheduler and lifecycle settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Working directory root
    pub fn work_dir(&self) -> &PathBuf {
        &self.acquisition.work_dir
    }

    /// Reject settings that would stall or loop the pipeline
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 6] = [
            (
                "acquisition.max_connections",
                self.acquisition.max_connections > 0,
            ),
            ("resolver.max_connections", self.resolver.max_connections > 0),
            ("delivery.batch_size", self.delivery.batch_size > 0),
            (
                "segment.max_halving_rounds",
                self.segment.max_halving_rounds > 0,
            ),
            (
                "segment.min_segment_secs",
                self.segment.min_segment_secs.is_finite() && self.segment.min_segment_secs > 0.0,
            ),
            ("scheduler.url_group_limit", self.scheduler.url_group_limit > 0),
        ];

        for (key, ok) in checks {
            if !ok {
                return Err(Error::Config {
                    message: format!("{key} must be greater than zero"),
                    key: Some(key.to_string()),
                });
            }
        }

        if self.delivery.max_batch_bytes == Some(0) {
            return Err(Error::Config {
                message: "delivery.max_batch_bytes must be greater than zero when set".into(),
                key: Some("delivery.max_batch_bytes".into()),
            });
        }

        Ok(())
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./work")
}

fn default_unsent_dir() -> Option<PathBuf> {
    Some(PathBuf::from("./unsent"))
}

fn default_download_connections() -> usize {
    5
}

fn default_resolver_connections() -> usize {
    10
}

fn default_user_agent() -> String {
    "Magic Browser".to_string()
}

fn default_fallback_extension() -> String {
    "mp4".to_string()
}

fn default_resolver_endpoint() -> String {
    "https://ytshorts.savetube.me/api/v1/terabox-downloader".to_string()
}

fn default_resolvable_prefixes() -> Vec<String> {
    vec!["https://terabox".to_string()]
}

fn default_max_halving_rounds() -> u32 {
    8
}

fn default_min_segment_secs() -> f64 {
    1.0
}

fn default_batch_size() -> usize {
    8
}

fn default_archive_extensions() -> Vec<String> {
    vec!["zip".to_string(), "7z".to_string()]
}

fn default_max_archive_depth() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_url_group_limit() -> usize {
    10
}

fn default_capture_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_event_capacity() -> usize {
    1000
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.acquisition.max_connections, 5);
        assert_eq!(config.acquisition.user_agent, "Magic Browser");
        assert_eq!(config.acquisition.fallback_extension, "mp4");
        assert_eq!(config.resolver.max_connections, 10);
        assert_eq!(config.delivery.batch_size, 8);
        assert_eq!(config.delivery.mode, DeliveryMode::Sequential);
        assert_eq!(config.segment.max_halving_rounds, 8);
        assert_eq!(config.scheduler.capture_grace, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{
            "acquisition": { "work_dir": "/tmp/ferry" },
            "delivery": { "batch_size": 4, "mode": "concurrent" },
            "scheduler": { "capture_grace": 2 }
        }"#;

        let config: Config = serde_json::from_str(json).expect("deserialize failed");
        assert_eq!(config.work_dir(), &PathBuf::from("/tmp/ferry"));
        assert_eq!(config.acquisition.max_connections, 5);
        assert_eq!(config.delivery.batch_size, 4);
        assert_eq!(config.delivery.mode, DeliveryMode::Concurrent);
        assert_eq!(
            config.delivery.archive_extensions,
            vec!["zip".to_string(), "7z".to_string()]
        );
        assert_eq!(config.scheduler.capture_grace, Duration::from_secs(2));
        assert_eq!(config.scheduler.url_group_limit, 10);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.delivery.batch_size = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("delivery.batch_size"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_batch_byte_cap() {
        let mut config = Config::default();
        config.delivery.max_batch_bytes = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolvable_prefixes_match_only_share_links() {
        let resolver = ResolverConfig::default();
        assert!(resolver.is_resolvable("https://terabox.com/s/1abc"));
        assert!(resolver.is_resolvable("https://teraboxapp.com/s/1abc"));
        assert!(!resolver.is_resolvable("https://cdn.example.com/terabox.mp4"));
    }
}
