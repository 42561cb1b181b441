#![forbid(unsafe_code)]

use crate::error::Error;
use crate::observation::{EntryKind, FileEvent, FileEventKind};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace};

/// Receives events from an [`EventSource`] on the source's own thread.
/// Implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &FileEvent);
    fn on_error(&self, path: Option<&Path>, err: &Error);
    /// The watched root went away; no further events will arrive from it.
    fn on_terminate(&self, root: &Path);
}

/// Something that watches a directory tree and pushes change events to its
/// subscribers.
pub trait EventSource: Send + Sync {
    fn root(&self) -> &Path;
    fn subscribe(&self, sink: Arc<dyn EventSink>);
    fn start(&self) -> Result<(), Error>;
    fn close(&self);
}

type Sinks = Arc<Mutex<Vec<Arc<dyn EventSink>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// [`EventSource`] backed by the platform's recommended `notify` watcher
/// (inotify on Linux). In recursive mode new subdirectories are picked up
/// by `notify` itself.
pub struct NotifySource {
    root: PathBuf,
    recursive: bool,
    sinks: Sinks,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl NotifySource {
    pub fn new(root: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            recursive,
            sinks: Arc::default(),
            watcher: Mutex::new(None),
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    fn dispatch(sinks: &Sinks, root: &Path, result: notify::Result<Event>) {
        let sinks = lock(sinks).clone();
        match result {
            Ok(event) => {
                let terminated = matches!(event.kind, EventKind::Remove(_))
                    && event.paths.iter().any(|path| path == root);
                for translated in translate(root, &event) {
                    trace!(path = %translated.path.display(), kind = ?translated.kind, "fs event");
                    for sink in &sinks {
                        sink.on_event(&translated);
                    }
                }
                if terminated {
                    info!(root = %root.display(), "watched root removed");
                    for sink in &sinks {
                        sink.on_terminate(root);
                    }
                }
            }
            Err(err) => {
                let path = err.paths.first().cloned();
                let err = Error::Watch(err);
                for sink in &sinks {
                    sink.on_error(path.as_deref(), &err);
                }
            }
        }
    }
}

impl EventSource for NotifySource {
    fn root(&self) -> &Path {
        &self.root
    }

    fn subscribe(&self, sink: Arc<dyn EventSink>) {
        lock(&self.sinks).push(sink);
    }

    fn start(&self) -> Result<(), Error> {
        let mut slot = lock(&self.watcher);
        if slot.is_some() {
            debug!(root = %self.root.display(), "watcher already running");
            return Ok(());
        }

        let sinks = Arc::clone(&self.sinks);
        let root = self.root.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            Self::dispatch(&sinks, &root, result);
        })?;
        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&self.root, mode)?;

        info!(root = %self.root.display(), recursive = self.recursive, "watching");
        *slot = Some(watcher);
        Ok(())
    }

    fn close(&self) {
        // Dropping the watcher stops its delivery thread.
        if lock(&self.watcher).take().is_some() {
            info!(root = %self.root.display(), "stopped watching");
        }
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifySource")
            .field("root", &self.root)
            .field("recursive", &self.recursive)
            .field("running", &lock(&self.watcher).is_some())
            .finish_non_exhaustive()
    }
}

/// Map a raw `notify` event onto zero or more [`FileEvent`]s.
pub(crate) fn translate(root: &Path, event: &Event) -> Vec<FileEvent> {
    if event.need_rescan() {
        return vec![FileEvent::overflow(root)];
    }

    let with = |path: &PathBuf, kind: FileEventKind, hint: Option<EntryKind>| FileEvent {
        path: path.clone(),
        kind,
        entry: hint.unwrap_or_else(|| entry_of(path)),
    };

    match event.kind {
        EventKind::Create(create) => {
            let hint = match create {
                CreateKind::File => Some(EntryKind::File),
                CreateKind::Folder => Some(EntryKind::Directory),
                _ => None,
            };
            event
                .paths
                .iter()
                .map(|path| with(path, FileEventKind::Created, hint))
                .collect()
        }
        EventKind::Remove(remove) => {
            // A removed path cannot be stat'ed, so unknown kinds count as files.
            let entry = match remove {
                RemoveKind::Folder => EntryKind::Directory,
                _ => EntryKind::File,
            };
            event
                .paths
                .iter()
                .map(|path| FileEvent {
                    path: path.clone(),
                    kind: FileEventKind::Deleted,
                    entry,
                })
                .collect()
        }
        EventKind::Modify(ModifyKind::Name(rename)) => match (rename, event.paths.as_slice()) {
            (RenameMode::From, [from, ..]) => vec![FileEvent::file(from, FileEventKind::Deleted)],
            (RenameMode::To, [to, ..]) => vec![with(to, FileEventKind::Created, None)],
            (RenameMode::Both, [from, to, ..]) => vec![
                FileEvent {
                    path: from.clone(),
                    kind: FileEventKind::Deleted,
                    entry: entry_of(to),
                },
                with(to, FileEventKind::Created, None),
            ],
            _ => event
                .paths
                .iter()
                .map(|path| with(path, FileEventKind::Modified, None))
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|path| with(path, FileEventKind::Modified, None))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn entry_of(path: &Path) -> EntryKind {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => EntryKind::Directory,
        _ => EntryKind::File,
    }
}
