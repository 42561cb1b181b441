#![forbid(unsafe_code)]

pub mod clock;
pub mod error;
pub mod governor;
pub mod observation;
pub mod scan;
pub mod schedule;
mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{BoxError, Error};
pub use governor::{
    CpulimitLimiter, LastAppliedLimit, LimitChange, ProcessLimitController, ProcessLimiter,
    ProcessProbe, ProcfsProbe, ScheduledLimitUpdater, TargetProcess,
};
pub use observation::{
    BoundedEventQueue, EventRouter, EventSink, EventSource, FileEvent, FileEventKind,
    NotifySource, PathApproval, PrefixApproval, RouterSettings, ScanGate,
};
pub use scan::{ClamdScanner, DirectoryQuarantine, ScanListener, ScanResult, Scanner};
pub use schedule::{LimitPolicy, ProfileEntry, TimeProfile};
