#![forbid(unsafe_code)]

use config::Config;
use orchestrator::error::Error;
use orchestrator::governor::{ProcessLimitController, ScheduledLimitUpdater};
use orchestrator::observation::EventRouter;
use orchestrator::scan::{ClamdScanner, DirectoryQuarantine, Scanner};
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshot reported on SIGUSR1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub queued: usize,
    pub overflow: u64,
    pub router_running: bool,
    pub governor: bool,
    pub last_limit: Option<u32>,
    pub scan_paused: bool,
    pub mocking: bool,
}

/// Everything the daemon runs: the governor with its updater (if enabled)
/// and the event router feeding clamd.
#[derive(Debug)]
pub struct Daemon {
    controller: Option<Arc<ProcessLimitController>>,
    updater: Option<ScheduledLimitUpdater>,
    router: EventRouter,
}

impl Daemon {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let scanner: Arc<dyn Scanner> = Arc::new(ClamdScanner::from_config(&config.clamd)?);
        Self::with_scanner(config, scanner)
    }

    pub fn with_scanner(config: &Config, scanner: Arc<dyn Scanner>) -> Result<Self, Error> {
        let controller = ProcessLimitController::from_config(&config.governor)?.map(Arc::new);
        let updater = controller
            .as_ref()
            .map(|controller| {
                ScheduledLimitUpdater::new(Arc::clone(controller), config.governor.update_interval)
            })
            .transpose()?;

        let mut router = EventRouter::from_config(&config.watch, scanner);
        if let Some(controller) = &controller {
            router = router.with_gate(Arc::<ProcessLimitController>::clone(controller));
        }
        if let Some(quarantine) = DirectoryQuarantine::from_config(&config.quarantine) {
            info!(dir = %quarantine.dir().display(), "quarantine enabled");
            router.add_listener(quarantine);
        }

        Ok(Self {
            controller,
            updater,
            router,
        })
    }

    /// Apply the profile once, start the governor updater, then the router.
    /// The first apply happens here so the scan gate already reflects the
    /// profile when the router drains its first batch.
    pub fn start(&self) -> Result<(), Error> {
        if let Some(controller) = &self.controller {
            if let Err(err) = controller.apply_current_policy_limit() {
                warn!(%err, "failed to apply initial limit");
            }
        }
        if let Some(updater) = &self.updater {
            updater.start()?;
        }
        self.router.start()?;
        info!(governor = self.controller.is_some(), "clamguard started");
        Ok(())
    }

    pub fn status(&self) -> Status {
        let queue = self.router.queue();
        let controller = self.controller.as_deref();
        Status {
            queued: queue.len(),
            overflow: queue.overflow_count(),
            router_running: self.router.is_running(),
            governor: controller.is_some(),
            last_limit: controller.and_then(ProcessLimitController::last_seen_limit),
            scan_paused: controller.is_some_and(ProcessLimitController::is_scan_paused),
            mocking: controller.is_some_and(ProcessLimitController::is_mocking),
        }
    }

    pub fn dump_status(&self) {
        let status = self.status();
        info!(?status, "current status");
    }

    /// Evaluate the profile now instead of waiting for the next tick.
    pub fn reapply_policy(&self) {
        let Some(controller) = &self.controller else {
            info!("governor disabled, nothing to reapply");
            return;
        };
        match controller.apply_current_policy_limit() {
            Ok(changed) => info!(changed, limit = ?controller.last_seen_limit(), "policy reapplied"),
            Err(err) => warn!(%err, "failed to reapply policy"),
        }
    }

    /// Stop scanning, stop the updater and lift the cap on clamd.
    pub fn shutdown(&self) {
        self.router.close();
        if let Some(updater) = &self.updater {
            updater.close();
        }
        if let Some(controller) = &self.controller {
            if let Err(err) = controller.deactivate() {
                warn!(%err, "failed to lift cpu limit");
            }
        }
        info!("shutdown complete");
    }
}
