#![forbid(unsafe_code)]

use crate::clock::{Clock, SystemClock};
use crate::error::{BoxError, Error};
use crate::governor::{CpulimitLimiter, ProcessLimiter, ProcessProbe, ProcfsProbe, TargetProcess};
use crate::observation::ScanGate;
use crate::schedule::LimitPolicy;
use chrono::NaiveDateTime;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, trace, warn};

/// Limit requested while the governor is deactivated. The external cap is
/// removed entirely.
pub const UNLIMITED: u32 = 100;

pub const DEFAULT_MIN_LIMIT: u32 = 20;

/// The last (pid, limit) pair pushed to the limiter. `limit` holds the
/// requested value, before the floor is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastAppliedLimit {
    pub pid: Option<u32>,
    pub limit: Option<u32>,
    pub applied_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitChange {
    pub pid: u32,
    pub old: Option<u32>,
    pub new: u32,
}

pub type LimitListener = dyn Fn(&LimitChange) -> Result<(), BoxError> + Send + Sync;

/// Applies a [`LimitPolicy`] to a live process.
///
/// Every operation runs under one lock, so the scheduled updater and ad-hoc
/// callers never interleave. Listeners run while that lock is held and must
/// not call back into the controller.
pub struct ProcessLimitController {
    target: TargetProcess,
    policy: LimitPolicy,
    limiter: Box<dyn ProcessLimiter>,
    probe: Box<dyn ProcessProbe>,
    clock: Box<dyn Clock>,
    min_limit: u32,
    mocking: AtomicBool,
    state: Mutex<LastAppliedLimit>,
    listeners: Mutex<Vec<Box<LimitListener>>>,
}

impl ProcessLimitController {
    pub fn new(target: TargetProcess, policy: LimitPolicy, limiter: Box<dyn ProcessLimiter>) -> Self {
        let clock: Box<dyn Clock> = Box::new(SystemClock);
        let state = LastAppliedLimit {
            pid: None,
            limit: None,
            applied_at: clock.now(),
        };
        Self {
            target,
            policy,
            limiter,
            probe: Box::new(ProcfsProbe),
            clock,
            min_limit: DEFAULT_MIN_LIMIT,
            mocking: AtomicBool::new(false),
            state: Mutex::new(state),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Controller for the governor section of the config, or `None` when the
    /// governor is disabled or has no target.
    pub fn from_config(config: &config::Governor) -> Result<Option<Self>, Error> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(target) = TargetProcess::from_config(config) else {
            warn!("governor enabled without pid or pid_file");
            return Ok(None);
        };
        let policy = LimitPolicy::from_config(config)?;
        let controller = Self::new(target, policy, Box::new(CpulimitLimiter::from_config(config)))
            .with_min_limit(config.min_limit)
            .with_mocking(config.mocking);
        Ok(Some(controller))
    }

    pub fn with_probe(mut self, probe: Box<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.state.get_mut().unwrap_or_else(|p| p.into_inner()).applied_at = clock.now();
        self.clock = clock;
        self
    }

    pub fn with_min_limit(mut self, min_limit: u32) -> Self {
        self.min_limit = min_limit;
        self
    }

    pub fn with_mocking(self, mocking: bool) -> Self {
        self.set_mocking(mocking);
        self
    }

    /// Register a listener for limit changes. Listener errors are logged and
    /// dropped.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&LimitChange) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.lock_listeners().push(Box::new(listener));
    }

    /// While mocking, the limiter is never called but state and listeners
    /// behave as usual.
    pub fn set_mocking(&self, mocking: bool) {
        self.mocking.store(mocking, Ordering::SeqCst);
    }

    pub fn is_mocking(&self) -> bool {
        self.mocking.load(Ordering::SeqCst)
    }

    pub fn min_limit(&self) -> u32 {
        self.min_limit
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Apply `percent` to the target process.
    ///
    /// Returns `false` without side effects when no live target exists or
    /// the same (pid, limit) pair was applied last. The limiter receives at
    /// least [`min_limit`](Self::min_limit), while the requested value is
    /// what gets remembered. State is updated before the limiter runs and is
    /// kept even if the limiter fails.
    pub fn apply_limit(&self, percent: u32) -> Result<bool, Error> {
        let mut state = self.lock_state();

        let Some(pid) = self.target.resolve(self.probe.as_ref()) else {
            trace!(percent, "no target process, limit not applied");
            return Ok(false);
        };

        if state.pid == Some(pid) && state.limit == Some(percent) {
            trace!(pid, percent, "limit unchanged");
            return Ok(false);
        }

        let old = state.limit;
        *state = LastAppliedLimit {
            pid: Some(pid),
            limit: Some(percent),
            applied_at: self.clock.now(),
        };

        let effective = percent.max(self.min_limit);
        let mocking = self.is_mocking();
        if !mocking {
            self.limiter.set_limit(pid, effective)?;
        }
        info!(pid, ?old, requested = percent, effective, mocking, "cpu limit changed");

        self.notify(&LimitChange {
            pid,
            old,
            new: percent,
        });
        Ok(true)
    }

    /// Evaluate the policy for the current time and apply it.
    pub fn apply_current_policy_limit(&self) -> Result<bool, Error> {
        let percent = self.policy.compute_limit(self.clock.now())?;
        self.apply_limit(percent)
    }

    /// Lift the external cap and forget the target. No-op without a live
    /// target.
    pub fn deactivate(&self) -> Result<(), Error> {
        let mut state = self.lock_state();

        let Some(pid) = self.target.resolve(self.probe.as_ref()) else {
            trace!("no target process, nothing to deactivate");
            return Ok(());
        };

        let old = state.limit;
        *state = LastAppliedLimit {
            pid: None,
            limit: Some(UNLIMITED),
            applied_at: self.clock.now(),
        };

        let mocking = self.is_mocking();
        if !mocking {
            self.limiter.clear_limit(pid)?;
        }
        info!(pid, ?old, mocking, "cpu limit deactivated");

        self.notify(&LimitChange {
            pid,
            old,
            new: UNLIMITED,
        });
        Ok(())
    }

    /// The remembered requested limit; `None` until something was applied.
    pub fn last_seen_limit(&self) -> Option<u32> {
        self.lock_state().limit
    }

    pub fn last_applied(&self) -> LastAppliedLimit {
        *self.lock_state()
    }

    /// Whether the remembered limit is below the floor, meaning new scans
    /// should not be submitted.
    pub fn is_scan_paused(&self) -> bool {
        self.last_seen_limit()
            .is_some_and(|limit| limit < self.min_limit)
    }

    fn notify(&self, change: &LimitChange) {
        for listener in self.lock_listeners().iter() {
            if let Err(err) = listener(change) {
                warn!(pid = change.pid, %err, "limit listener failed");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LastAppliedLimit> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Box<LimitListener>>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ScanGate for ProcessLimitController {
    fn is_open(&self) -> bool {
        !self.is_scan_paused()
    }
}

impl fmt::Debug for ProcessLimitController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLimitController")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("min_limit", &self.min_limit)
            .field("mocking", &self.is_mocking())
            .field("state", &self.last_applied())
            .finish()
    }
}
