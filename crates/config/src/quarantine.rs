use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Quarantine {
    /// Directory infected files are moved or copied into. Nothing is
    /// quarantined when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    pub action: QuarantineAction,
}

/// What happens to an infected file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineAction {
    /// Move the file, leaving nothing behind.
    #[default]
    Move,

    /// Copy the file and keep the original in place.
    Copy,
}
