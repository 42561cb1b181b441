#![forbid(unsafe_code)]

use crate::error::Error;
use crate::governor::ProcessLimitController;
use crate::worker::{StopSignal, Worker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Shortest period accepted; anything faster only hammers the limiter.
pub const MIN_UPDATE_PERIOD: Duration = Duration::from_secs(60);

/// Re-applies the controller's policy at a fixed rate on a background
/// thread. A failed update is logged and the next one runs on schedule.
#[derive(Debug)]
pub struct ScheduledLimitUpdater {
    controller: Arc<ProcessLimitController>,
    period: Duration,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl ScheduledLimitUpdater {
    pub fn new(controller: Arc<ProcessLimitController>, period: Duration) -> Result<Self, Error> {
        if period < MIN_UPDATE_PERIOD {
            return Err(Error::UpdatePeriod(period));
        }
        Ok(Self::with_period(controller, period))
    }

    fn with_period(controller: Arc<ProcessLimitController>, period: Duration) -> Self {
        Self {
            controller,
            period,
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start ticking. The first update runs immediately. Starting a running
    /// updater does nothing.
    pub fn start(&self) -> Result<(), Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("limit updater already running");
            return Ok(());
        }

        let controller = Arc::clone(&self.controller);
        let period = self.period;
        let worker = Worker::spawn("limit-updater", move |stop| {
            Self::run(&controller, period, &stop)
        });
        match worker {
            Ok(worker) => {
                *self.lock_worker() = Some(worker);
                info!(?period, "limit updater started");
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Stop ticking and join the thread. Safe to call repeatedly.
    pub fn close(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(worker) = self.lock_worker().take() {
            worker.stop();
        }
        info!("limit updater stopped");
    }

    fn run(controller: &ProcessLimitController, period: Duration, stop: &StopSignal) {
        let mut next = Instant::now();
        loop {
            match controller.apply_current_policy_limit() {
                Ok(changed) => trace!(changed, "scheduled limit update"),
                Err(err) => warn!(%err, "scheduled limit update failed"),
            }

            // Fixed rate: ticks missed while busy are skipped, not replayed.
            next += period;
            let now = Instant::now();
            while next <= now {
                next += period;
            }
            if stop.wait_until(next) {
                break;
            }
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ScheduledLimitUpdater {
    fn drop(&mut self) {
        self.close();
    }
}
