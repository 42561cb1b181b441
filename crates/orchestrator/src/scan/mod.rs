#![forbid(unsafe_code)]

mod clamd;
mod quarantine;

pub use clamd::{ClamdScanner, Endpoint};
pub use quarantine::DirectoryQuarantine;

use crate::error::{BoxError, Error};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Outcome of scanning one path. A directory scan may report several
/// infected files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    viruses: BTreeMap<PathBuf, Vec<String>>,
}

impl ScanResult {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.viruses.is_empty()
    }

    /// Record a signature found in `path`.
    pub fn add_virus(&mut self, path: impl Into<PathBuf>, signature: impl Into<String>) {
        self.viruses
            .entry(path.into())
            .or_default()
            .push(signature.into());
    }

    pub fn viruses(&self) -> &BTreeMap<PathBuf, Vec<String>> {
        &self.viruses
    }

    pub fn infected_paths(&self) -> impl Iterator<Item = &Path> {
        self.viruses.keys().map(PathBuf::as_path)
    }
}

pub trait Scanner: Send + Sync {
    fn scan(&self, path: &Path) -> Result<ScanResult, Error>;
}

/// Consumer of scan results. Errors are logged by the caller and
/// otherwise ignored.
pub trait ScanListener: Send + Sync {
    fn on_scan(&self, result: &ScanResult) -> Result<(), BoxError>;
}

impl<F> ScanListener for F
where
    F: Fn(&ScanResult) -> Result<(), BoxError> + Send + Sync,
{
    fn on_scan(&self, result: &ScanResult) -> Result<(), BoxError> {
        self(result)
    }
}
