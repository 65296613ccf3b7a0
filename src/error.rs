//! Error types for the telemetry pipeline
//!
//! Source and buffer errors are fatal to the producer flow and are returned
//! to the operator. Store errors are recoverable from the buffer's point of
//! view (the batch is retained). Validation errors reject one submission.

use std::path::PathBuf;

/// Errors raised by a replayable CSV source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// File missing, unreadable, or without any data rows
    #[error("{stream} source unavailable at {path}: {reason}")]
    Unavailable { stream: &'static str, path: PathBuf, reason: String },

    /// Stream too short to yield a record after the wraparound skip
    #[error("{stream} source exhausted after wraparound skip")]
    ExhaustedAfterSkip { stream: &'static str },

    /// A data row could not be parsed into a record
    #[error("{stream} source malformed record at line {line}: {reason}")]
    MalformedRecord { stream: &'static str, line: u64, reason: String },

    /// `next()` called after `close()`
    #[error("{stream} source is closed")]
    Closed { stream: &'static str },
}

/// Errors raised by a store gateway
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store api request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote store answered with a non-success status
    #[error("store api rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("store task failed: {0}")]
    Task(String),
}

/// Fatal errors that abort the producer pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Saves kept failing until the retained batch hit its cap
    #[error("batch buffer overflow: {buffered} samples retained (cap {cap})")]
    BufferOverflow { buffered: usize, cap: usize },
}

/// A submission was rejected before touching the store
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
