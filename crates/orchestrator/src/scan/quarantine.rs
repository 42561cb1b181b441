#![forbid(unsafe_code)]

use crate::error::{BoxError, Error};
use crate::scan::{ScanListener, ScanResult};
use config::QuarantineAction;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Moves or copies infected files into a quarantine directory.
#[derive(Debug, Clone)]
pub struct DirectoryQuarantine {
    dir: PathBuf,
    action: QuarantineAction,
}

impl DirectoryQuarantine {
    pub fn new(dir: impl Into<PathBuf>, action: QuarantineAction) -> Self {
        Self {
            dir: dir.into(),
            action,
        }
    }

    /// `None` when no quarantine directory is configured.
    pub fn from_config(config: &config::Quarantine) -> Option<Self> {
        config
            .dir
            .as_ref()
            .map(|dir| Self::new(dir.clone(), config.action))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Quarantine every infected file in `result`, returning where each one
    /// ended up. All files are attempted; the first failure is returned.
    pub fn quarantine(&self, result: &ScanResult) -> Result<Vec<PathBuf>, Error> {
        if result.is_ok() {
            return Ok(Vec::new());
        }
        fs::create_dir_all(&self.dir).map_err(|source| Error::Quarantine {
            path: self.dir.clone(),
            source,
        })?;

        let mut placed = Vec::new();
        let mut first_err = None;
        for (path, signatures) in result.viruses() {
            match self.place(path) {
                Ok(target) => {
                    info!(
                        path = %path.display(),
                        target = %target.display(),
                        ?signatures,
                        action = ?self.action,
                        "quarantined"
                    );
                    placed.push(target);
                }
                Err(source) => {
                    warn!(path = %path.display(), %source, "quarantine failed");
                    if first_err.is_none() {
                        first_err = Some(Error::Quarantine {
                            path: path.clone(),
                            source,
                        });
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(placed),
        }
    }

    fn place(&self, path: &Path) -> std::io::Result<PathBuf> {
        let target = self.free_target(path)?;
        match self.action {
            QuarantineAction::Copy => {
                fs::copy(path, &target)?;
            }
            QuarantineAction::Move => {
                if fs::rename(path, &target).is_err() {
                    // Different filesystem: copy, then drop the original.
                    fs::copy(path, &target)?;
                    fs::remove_file(path)?;
                }
            }
        }
        Ok(target)
    }

    /// `<dir>/<name>`, or `<dir>/<name>.<n>` for the first free `n`.
    fn free_target(&self, path: &Path) -> std::io::Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;
        let mut target = self.dir.join(name);
        let mut n = 1u32;
        while target.symlink_metadata().is_ok() {
            let mut numbered = OsString::from(name);
            numbered.push(format!(".{n}"));
            target = self.dir.join(numbered);
            n += 1;
        }
        Ok(target)
    }
}

impl ScanListener for DirectoryQuarantine {
    fn on_scan(&self, result: &ScanResult) -> Result<(), BoxError> {
        self.quarantine(result)?;
        Ok(())
    }
}
