#![forbid(unsafe_code)]

use crate::error::Error;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use rustc_hash::FxHashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub trait ProcessLimiter: Send + Sync {
    /// Cap the CPU usage of `pid` at `percent`, replacing any previous cap.
    fn set_limit(&self, pid: u32, percent: u32) -> Result<(), Error>;
    /// Remove the cap on `pid`, if any.
    fn clear_limit(&self, pid: u32) -> Result<(), Error>;
}

/// Throttles processes by running one `cpulimit` child per target.
#[derive(Debug)]
pub struct CpulimitLimiter {
    program: PathBuf,
    args: Vec<OsString>,
    children: Mutex<FxHashMap<u32, Child>>,
}

impl CpulimitLimiter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            children: Mutex::new(FxHashMap::default()),
        }
    }

    /// Extra arguments placed before `--pid`/`--limit`.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &config::Governor) -> Self {
        Self::new(config.limiter.clone()).with_args(config.limiter_args.iter())
    }

    /// Number of throttling children currently running.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<u32, Child>> {
        match self.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stop a throttling child. SIGTERM (rather than SIGKILL) gives cpulimit
    /// the chance to resume a target it left stopped.
    fn terminate(mut child: Child) -> std::io::Result<()> {
        let Ok(raw) = i32::try_from(child.id()) else {
            child.kill()?;
            child.wait()?;
            return Ok(());
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => return Err(err.into()),
        }
        child.wait()?;
        Ok(())
    }
}

impl ProcessLimiter for CpulimitLimiter {
    fn set_limit(&self, pid: u32, percent: u32) -> Result<(), Error> {
        let set_err = |reason: String| Error::SetLimit {
            pid,
            percent,
            reason,
        };

        let mut children = self.lock();
        if let Some(previous) = children.remove(&pid) {
            Self::terminate(previous).map_err(|err| set_err(err.to_string()))?;
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(format!("--pid={pid}"))
            .arg(format!("--limit={percent}"))
            .arg("--lazy")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| set_err(format!("cannot run {}: {err}", self.program.display())))?;

        match child.try_wait() {
            Ok(None) => {
                debug!(pid, percent, limiter_pid = child.id(), "limiter started");
                children.insert(pid, child);
                Ok(())
            }
            Ok(Some(status)) if status.success() => {
                info!(pid, percent, "limiter exited right away");
                Ok(())
            }
            Ok(Some(status)) => Err(set_err(format!(
                "{} exited with {status}",
                self.program.display()
            ))),
            Err(err) => Err(set_err(err.to_string())),
        }
    }

    fn clear_limit(&self, pid: u32) -> Result<(), Error> {
        let Some(child) = self.lock().remove(&pid) else {
            debug!(pid, "no limiter running");
            return Ok(());
        };
        Self::terminate(child).map_err(|err| Error::ClearLimit {
            pid,
            reason: err.to_string(),
        })
    }
}

impl Drop for CpulimitLimiter {
    fn drop(&mut self) {
        let children = std::mem::take(&mut *self.lock());
        for (pid, child) in children {
            if let Err(err) = Self::terminate(child) {
                warn!(pid, %err, "failed to stop limiter");
            }
        }
    }
}
