#![forbid(unsafe_code)]

mod admission;
mod event;
mod queue;
mod router;
mod source;

pub use admission::{ApproveAll, PathApproval, PrefixApproval};
pub use event::{EntryKind, FileEvent, FileEventKind};
pub use queue::{BoundedEventQueue, DEFAULT_CAPACITY, MAX_CAPACITY, MIN_CAPACITY};
pub use router::{EventRouter, RouterSettings, ScanGate};
pub use source::{EventSink, EventSource, NotifySource};
