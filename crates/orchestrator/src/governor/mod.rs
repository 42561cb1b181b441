#![forbid(unsafe_code)]

mod controller;
mod limiter;
mod target;
mod updater;

pub use controller::{
    DEFAULT_MIN_LIMIT, LastAppliedLimit, LimitChange, LimitListener, ProcessLimitController,
    UNLIMITED,
};
pub use limiter::{CpulimitLimiter, ProcessLimiter};
pub use target::{PidSupplier, ProcessProbe, ProcfsProbe, TargetProcess};
pub use updater::{MIN_UPDATE_PERIOD, ScheduledLimitUpdater};
