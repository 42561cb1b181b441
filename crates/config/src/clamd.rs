use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

/// Where the scanning daemon listens.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Clamd {
    /// Path of the clamd local (Unix) socket. Ignored when `address` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,

    /// TCP address of clamd, e.g. `127.0.0.1:3310`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Read/write timeout for a single command. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub timeout: Duration,
}

impl Default for Clamd {
    fn default() -> Self {
        Self {
            socket: Some(PathBuf::from("/run/clamav/clamd.ctl")),
            address: None,
            timeout: Duration::from_secs(30),
        }
    }
}
