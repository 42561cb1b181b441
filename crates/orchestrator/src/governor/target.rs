#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

pub trait ProcessProbe: Send + Sync {
    /// Whether a process with this id currently exists and is not a zombie.
    fn is_alive(&self, pid: u32) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsProbe;

impl ProcessProbe for ProcfsProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        procfs::process::Process::new(pid)
            .map(|process| process.is_alive())
            .unwrap_or(false)
    }
}

pub type PidSupplier = dyn Fn() -> Option<u32> + Send + Sync;

/// How the id of the throttled process is found. Evaluated on every use,
/// so a restarted daemon is picked up through its pid file.
#[derive(Clone)]
pub enum TargetProcess {
    Static(u32),
    /// First non-blank line of a file.
    PidFile(PathBuf),
    Supplier(Arc<PidSupplier>),
}

impl TargetProcess {
    pub fn supplier<F>(f: F) -> Self
    where
        F: Fn() -> Option<u32> + Send + Sync + 'static,
    {
        Self::Supplier(Arc::new(f))
    }

    /// Target described by the governor config; a static pid wins over a pid
    /// file.
    pub fn from_config(config: &config::Governor) -> Option<Self> {
        match (config.pid, &config.pid_file) {
            (Some(pid), _) => Some(Self::Static(pid)),
            (None, Some(path)) => Some(Self::PidFile(path.clone())),
            (None, None) => None,
        }
    }

    /// Id of the live target process, if there is one. Unreadable files,
    /// garbage and dead processes all resolve to `None`.
    pub fn resolve(&self, probe: &dyn ProcessProbe) -> Option<u32> {
        let pid = match self {
            Self::Static(pid) => Some(*pid),
            Self::PidFile(path) => match std::fs::read_to_string(path) {
                Ok(text) => Self::parse_pid(&text),
                Err(err) => {
                    trace!(path = %path.display(), %err, "pid file unreadable");
                    None
                }
            },
            Self::Supplier(supplier) => supplier(),
        }?;

        if pid == 0 || !probe.is_alive(pid) {
            debug!(pid, "target process is not alive");
            return None;
        }
        Some(pid)
    }

    fn parse_pid(text: &str) -> Option<u32> {
        text.lines()
            .map(str::trim)
            .find(|line| !line.is_empty())?
            .parse()
            .ok()
    }
}

impl fmt::Debug for TargetProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(pid) => f.debug_tuple("Static").field(pid).finish(),
            Self::PidFile(path) => f.debug_tuple("PidFile").field(path).finish(),
            Self::Supplier(_) => f.write_str("Supplier(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    struct AliveSet(HashSet<u32>);

    impl ProcessProbe for AliveSet {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn alive(pids: &[u32]) -> AliveSet {
        AliveSet(pids.iter().copied().collect())
    }

    #[test]
    fn static_pid_requires_live_process() {
        let probe = alive(&[42]);
        assert_eq!(TargetProcess::Static(42).resolve(&probe), Some(42));
        assert_eq!(TargetProcess::Static(43).resolve(&probe), None);
        assert_eq!(TargetProcess::Static(0).resolve(&alive(&[0])), None);
    }

    #[test]
    fn pid_file_uses_first_non_blank_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clamd.pid");
        std::fs::write(&path, "\n   \n  1234  \n999\n").unwrap();

        let target = TargetProcess::PidFile(path.clone());
        assert_eq!(target.resolve(&alive(&[1234, 999])), Some(1234));

        std::fs::write(&path, "not-a-pid\n").unwrap();
        assert_eq!(target.resolve(&alive(&[1234])), None);

        std::fs::write(&path, "\n\n").unwrap();
        assert_eq!(target.resolve(&alive(&[1234])), None);
    }

    #[test]
    fn missing_pid_file_resolves_to_none() {
        let dir = tempdir().unwrap();
        let target = TargetProcess::PidFile(dir.path().join("absent.pid"));
        assert_eq!(target.resolve(&alive(&[1])), None);
    }

    #[test]
    fn supplier_is_evaluated_each_time() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let next = Arc::new(AtomicU32::new(10));
        let source = next.clone();
        let target = TargetProcess::supplier(move || Some(source.fetch_add(1, Ordering::SeqCst)));

        let probe = alive(&[10, 11]);
        assert_eq!(target.resolve(&probe), Some(10));
        assert_eq!(target.resolve(&probe), Some(11));
        assert_eq!(target.resolve(&probe), None);

        let empty = TargetProcess::supplier(|| None);
        assert_eq!(empty.resolve(&probe), None);
    }

    #[test]
    fn procfs_probe_sees_current_process() {
        assert!(ProcfsProbe.is_alive(std::process::id()));
        assert!(!ProcfsProbe.is_alive(u32::MAX));
    }

    #[test]
    fn config_prefers_static_pid() {
        let mut governor = config::Governor {
            pid: Some(7),
            ..Default::default()
        };
        assert!(matches!(
            TargetProcess::from_config(&governor),
            Some(TargetProcess::Static(7))
        ));
        governor.pid = None;
        assert!(matches!(
            TargetProcess::from_config(&governor),
            Some(TargetProcess::PidFile(_))
        ));
        governor.pid_file = None;
        assert!(TargetProcess::from_config(&governor).is_none());
    }
}
