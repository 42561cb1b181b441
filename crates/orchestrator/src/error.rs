#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

/// Error returned by user-supplied callbacks (policy functions, listeners).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid time profile `{spec}`: {reason}")]
    ProfileFormat { spec: String, reason: String },

    #[error("time profile `{name}` has out-of-order or overlapping entries at index {index}")]
    ProfileOrder { name: String, index: usize },

    #[error("time profile `{0}` has no entries")]
    EmptyProfile(String),

    #[error("weekly limit policy needs exactly 7 profiles, got {0}")]
    WeekdayCount(usize),

    #[error("limit policy function failed: {0}")]
    PolicyFunction(#[source] BoxError),

    #[error("update period of {0:?} is shorter than the 60s minimum")]
    UpdatePeriod(Duration),

    #[error("failed to set cpu limit of {percent}% on pid {pid}: {reason}")]
    SetLimit {
        pid: u32,
        percent: u32,
        reason: String,
    },

    #[error("failed to clear cpu limit on pid {pid}: {reason}")]
    ClearLimit { pid: u32, reason: String },

    #[error("scan of {path} failed: {reason}")]
    Scan { path: PathBuf, reason: String },

    #[error("clamd protocol error: {0}")]
    Protocol(String),

    #[error("no clamd socket or address configured")]
    NoEndpoint,

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to quarantine {path}: {source}")]
    Quarantine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
