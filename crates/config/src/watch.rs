use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Watch {
    /// Directories whose file changes are fed to the scanner.
    pub roots: Vec<PathBuf>,

    /// Also watch subdirectories, including ones created later.
    pub recursive: bool,

    /// Path prefixes deciding which changed files get scanned. An item
    /// starting with an exclamation mark rejects matching files. The longest
    /// matching item wins and files matching nothing are accepted, so
    /// `["!/home/user/.cache"]` scans everything except the cache.
    pub include: Vec<PathBuf>,

    /// Maximum number of paths waiting to be scanned. Clamped to
    /// 5..=100000. When full, the oldest pending paths are dropped.
    pub queue_capacity: usize,

    /// Number of queued paths drained per worker pass.
    pub batch_size: usize,

    /// Pause between polls of an empty queue. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub idle_sleep: Duration,

    /// Consecutive scan failures after which the worker gives up.
    pub max_errors: u32,
}

impl Default for Watch {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            include: Vec::new(),
            queue_capacity: 1000,
            batch_size: 200,
            idle_sleep: Duration::from_secs(2),
            max_errors: 1000,
        }
    }
}
