#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    /// The source lost events; `path` is the watched root.
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub entry: EntryKind,
}

impl FileEvent {
    pub fn file(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            entry: EntryKind::File,
        }
    }

    pub fn directory(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            entry: EntryKind::Directory,
        }
    }

    pub fn overflow(root: impl Into<PathBuf>) -> Self {
        Self::directory(root, FileEventKind::Overflow)
    }
}
