//! Error types for media-ferry
//!
//! This module provides the error taxonomy for the pipeline:
//! - A crate-wide [`Error`] with `#[from]` conversions for I/O, HTTP and JSON failures
//! - Domain enums for each stage (resolution, acquisition, segmentation, delivery)
//! - Helpers that let callers tell "cannot ever succeed" apart from transient tool failures

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-ferry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-ferry
///
/// Each variant carries enough context to be logged without further lookups.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "delivery.batch_size")
        key: Option<String>,
    },

    /// Link resolution failed
    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Acquisition of a single URL failed
    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// Segmentation of a file failed or cannot be satisfied
    #[error("segmentation error: {0}")]
    Segment(#[from] SegmentError),

    /// Delivery to the external collaborator failed
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    Extraction {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (ffmpeg, ffprobe)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, not implemented, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Shutdown in progress - not accepting new submissions
    #[error("shutdown in progress: not accepting new submissions")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Link resolution errors
///
/// These never escape [`crate::resolver::LinkResolver::resolve`]; they are logged
/// and turned into an absent entry.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The endpoint answered with a non-success status
    #[error("resolver returned status {status} for {url}")]
    Status {
        /// The link being resolved
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body was not the expected JSON document
    #[error("malformed resolver response for {url}: {reason}")]
    Malformed {
        /// The link being resolved
        url: String,
        /// Parser error
        reason: String,
    },

    /// The response parsed but carried no usable entry
    #[error("resolver returned no usable entry for {url}")]
    Empty {
        /// The link being resolved
        url: String,
    },
}

/// Per-URL acquisition errors
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The server answered with a non-success status
    #[error("server returned {status} for {url}")]
    HttpStatus {
        /// The URL being downloaded
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Live playlist capture failed
    #[error("failed to capture {url}: {reason}")]
    Capture {
        /// The playlist URL
        url: String,
        /// The reason capture failed
        reason: String,
    },
}

/// Segmentation errors
#[derive(Debug, Error)]
pub enum SegmentError {
    /// The file already fits, there is nothing to segment
    #[error("{file} is {size} bytes, already within the {ceiling} byte ceiling")]
    AlreadyWithinCeiling {
        /// The source file
        file: PathBuf,
        /// Size of the source in bytes
        size: u64,
        /// The requested ceiling in bytes
        ceiling: u64,
    },

    /// The ceiling yields a first segment shorter than the configured minimum
    #[error("ceiling of {ceiling} bytes is too small to segment {file}")]
    CeilingTooSmall {
        /// The source file
        file: PathBuf,
        /// The requested ceiling in bytes
        ceiling: u64,
    },

    /// Parts still exceed the ceiling after every halving round was used
    #[error("could not fit {file} under {ceiling} bytes after {rounds} halving rounds")]
    CannotFit {
        /// The source file
        file: PathBuf,
        /// The requested ceiling in bytes
        ceiling: u64,
        /// Number of rounds attempted
        rounds: u32,
    },

    /// Reading duration metadata failed
    #[error("failed to probe {file}: {reason}")]
    ProbeFailed {
        /// The probed file
        file: PathBuf,
        /// The reason probing failed
        reason: String,
    },

    /// The transcoding subprocess failed
    #[error("transcoder failed on {file}: {reason}")]
    ToolFailed {
        /// The file being processed
        file: PathBuf,
        /// The reason the tool failed
        reason: String,
    },
}

impl SegmentError {
    /// Whether retrying can never succeed for this file and ceiling
    ///
    /// Unsatisfiable errors are reported to the caller and never retried; tool
    /// failures leave the source in place and may succeed on resubmission.
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(
            self,
            SegmentError::AlreadyWithinCeiling { .. }
                | SegmentError::CeilingTooSmall { .. }
                | SegmentError::CannotFit { .. }
        )
    }
}

/// Delivery errors raised by a [`crate::delivery::DeliverySink`]
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport rejected a batch
    #[error("batch of {files} file(s) rejected: {reason}")]
    Rejected {
        /// Number of files in the batch
        files: usize,
        /// Transport error message
        reason: String,
    },

    /// The destination cannot be reached
    #[error("destination {destination} unavailable: {reason}")]
    Unavailable {
        /// Destination identifier
        destination: String,
        /// The reason the destination is unavailable
        reason: String,
    },
}
