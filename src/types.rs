//! Core types for media-ferry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable identifier of a logical destination (the unit of scheduling exclusivity)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub u64);

impl DestinationId {
    /// Create a new DestinationId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DestinationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DestinationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Direct download links obtained from one indirect share link
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedLink {
    /// Thumbnail URL (may be empty)
    pub thumbnail: String,
    /// Title reported by the resolver (may be empty)
    pub title: String,
    /// Fast, time-limited download URL
    pub fast_link: String,
    /// HD download URL (may be empty)
    pub slow_link: String,
}

/// Where a destination's batches end up
///
/// The delivery collaborator branches on this once instead of every call site
/// inspecting the concrete channel type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// A specific text channel
    Channel {
        /// Channel id
        channel_id: u64,
    },
    /// A thread inside a channel or forum
    Thread {
        /// Parent channel id
        parent_id: u64,
        /// Thread id
        thread_id: u64,
    },
    /// Whatever channel the request came from
    Reply,
}

/// Caller context travelling with every work unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Who asked for the work (used for completion notices)
    pub requester: String,
    /// Channel the request was issued from
    pub reply_channel: u64,
    /// Where delivered batches go
    pub target: DeliveryTarget,
    /// When the request was accepted
    pub submitted_at: DateTime<Utc>,
}

impl RequestContext {
    /// Create a context stamped with the current time
    pub fn new(requester: impl Into<String>, reply_channel: u64, target: DeliveryTarget) -> Self {
        Self {
            requester: requester.into(),
            reply_channel,
            target,
            submitted_at: Utc::now(),
        }
    }

    /// Channel id batches are sent to, resolving [`DeliveryTarget::Reply`]
    pub fn channel_id(&self) -> u64 {
        match self.target {
            DeliveryTarget::Channel { channel_id } => channel_id,
            DeliveryTarget::Thread { thread_id, .. } => thread_id,
            DeliveryTarget::Reply => self.reply_channel,
        }
    }
}

/// Media facts needed to plan a split
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_secs: f64,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Summary of one delivery pass over a directory (merged across recursion)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Batches the collaborator accepted
    pub batches_sent: usize,
    /// Batches the collaborator rejected
    pub batches_failed: usize,
    /// Files contained in accepted batches
    pub files_sent: usize,
    /// Archives that were unpacked and routed again
    pub archives_unpacked: usize,
    /// Oversized files that were segmented
    pub files_segmented: usize,
    /// Files that could not be delivered (kept in the unsent directory when configured)
    pub unsent: Vec<PathBuf>,
    /// Entries whose handling failed, with the reason
    pub errors: Vec<String>,
}

impl DeliveryReport {
    /// Fold a nested report into this one
    pub fn merge(&mut self, other: DeliveryReport) {
        self.batches_sent += other.batches_sent;
        self.batches_failed += other.batches_failed;
        self.files_sent += other.files_sent;
        self.archives_unpacked += other.archives_unpacked;
        self.files_segmented += other.files_segmented;
        self.unsent.extend(other.unsent);
        self.errors.extend(other.errors);
    }
}

/// Event emitted during the pipeline lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// URLs accepted for a destination
    Submitted {
        /// Destination id
        destination: DestinationId,
        /// Number of fetchable URLs after resolution
        urls: usize,
        /// Number of work units enqueued
        units: usize,
    },

    /// An indirect link could not be resolved
    Unresolved {
        /// The share link
        url: String,
    },

    /// A worker started draining a destination
    WorkerStarted {
        /// Destination id
        destination: DestinationId,
    },

    /// A group of URLs finished downloading
    Acquired {
        /// Destination id
        destination: DestinationId,
        /// Files present in the scratch directory
        downloaded: usize,
        /// URLs that did not produce a file
        failed: Vec<String>,
    },

    /// An oversized file was split
    Segmented {
        /// Original file name
        file: PathBuf,
        /// Number of parts produced
        parts: usize,
    },

    /// A batch reached the delivery collaborator
    BatchDelivered {
        /// Destination id
        destination: DestinationId,
        /// Files in the batch
        files: usize,
        /// Total bytes in the batch
        bytes: u64,
    },

    /// The delivery collaborator rejected a batch
    BatchFailed {
        /// Destination id
        destination: DestinationId,
        /// Error message
        error: String,
    },

    /// A work unit returned an error or panicked
    UnitFailed {
        /// Destination id
        destination: DestinationId,
        /// Error message
        error: String,
    },

    /// A destination's queue drained and its worker exited
    Drained {
        /// Destination id
        destination: DestinationId,
        /// Units that completed successfully
        completed: usize,
        /// Units that failed
        failed: usize,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
