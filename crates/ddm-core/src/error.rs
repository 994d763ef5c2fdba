//! Typed engine errors (spec-mandated error kinds).
//!
//! Internal plumbing that only needs to propagate failures keeps using
//! `anyhow`, exactly as the rest of this crate does; this enum exists for
//! the handful of call sites (`Mission::wait`, `Engine::get_failed_missions`,
//! configuration setters) whose callers need to match on *what kind* of
//! failure happened, not just read a message.

use std::path::PathBuf;

/// A typed error kind for the download engine.
#[derive(Debug, thiserror::Error)]
pub enum DdmError {
    /// A mission was submitted with an empty or missing URL.
    #[error("url is empty")]
    UrlEmpty,

    /// The connector exhausted its retry budget without a response.
    #[error("connection failed: {0}")]
    ConnectError(String),

    /// A request completed with a final non-ok HTTP status.
    #[error("http status: {0}")]
    HttpStatus(u32),

    /// A filesystem operation (open/write/unlink/mkdir) failed.
    #[error("filesystem error at {path}: {source}")]
    FileSystemError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// On-disk size did not match the declared `Content-Length` once all
    /// tasks reached a terminal state.
    #[error("size mismatch: expected {expected}, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The mission or scheduler was cancelled by the caller.
    #[error("canceled")]
    Canceled,

    /// A configuration setter rejected its value.
    #[error("invalid configuration for {field}: {reason}")]
    Config { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, DdmError>;
