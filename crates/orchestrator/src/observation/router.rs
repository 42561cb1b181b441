#![forbid(unsafe_code)]

use crate::error::Error;
use crate::observation::{
    ApproveAll, BoundedEventQueue, EntryKind, EventSink, EventSource, FileEvent, FileEventKind,
    PathApproval, PrefixApproval,
};
use crate::scan::{ScanListener, ScanResult, Scanner};
use crate::worker::{StopSignal, Worker};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Lets an outside component hold back scanning without stopping the
/// router. Events keep being queued while the gate is closed.
pub trait ScanGate: Send + Sync {
    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// Most paths taken off the queue per drain.
    pub batch_size: usize,
    /// Sleep when the queue is empty or the gate is closed, and back-off
    /// after a failed scan.
    pub idle_sleep: Duration,
    /// Consecutive scan failures tolerated before the worker gives up.
    pub max_errors: u32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            batch_size: 200,
            idle_sleep: Duration::from_secs(2),
            max_errors: 1000,
        }
    }
}

impl RouterSettings {
    pub fn from_config(config: &config::Watch) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            idle_sleep: config.idle_sleep,
            max_errors: config.max_errors,
        }
    }
}

type Listeners = Arc<Mutex<Vec<Arc<dyn ScanListener>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Front half of the router: turns file events into queue operations.
struct Intake {
    queue: Arc<BoundedEventQueue>,
    approval: Box<dyn PathApproval>,
}

impl EventSink for Intake {
    fn on_event(&self, event: &FileEvent) {
        match (event.entry, event.kind) {
            (_, FileEventKind::Overflow) => {
                debug!(root = %event.path.display(), "event source overflowed");
            }
            (EntryKind::Directory, _) => {}
            (EntryKind::File, FileEventKind::Created | FileEventKind::Modified) => {
                if self.approval.approve(&event.path) {
                    self.queue.push(event.path.clone());
                } else {
                    trace!(path = %event.path.display(), "not approved");
                }
            }
            (EntryKind::File, FileEventKind::Deleted) => {
                if self.queue.remove(&event.path) {
                    trace!(path = %event.path.display(), "pending scan cancelled");
                }
            }
        }
    }

    fn on_error(&self, path: Option<&Path>, err: &Error) {
        warn!(path = ?path, %err, "event source error");
    }

    fn on_terminate(&self, root: &Path) {
        warn!(root = %root.display(), "event source terminated");
    }
}

/// Back half of the router: everything the worker thread needs.
#[derive(Clone)]
struct Drain {
    queue: Arc<BoundedEventQueue>,
    scanner: Arc<dyn Scanner>,
    listeners: Listeners,
    gate: Option<Arc<dyn ScanGate>>,
    settings: RouterSettings,
}

impl Drain {
    fn gate_open(&self) -> bool {
        self.gate.as_ref().is_none_or(|gate| gate.is_open())
    }

    fn run(&self, stop: &StopSignal) {
        let mut errors = 0u32;
        while !stop.is_stopped() {
            if !self.gate_open() {
                trace!("scan gate closed");
                stop.wait(self.settings.idle_sleep);
                continue;
            }

            let batch = self.queue.pop_batch(self.settings.batch_size, true);
            if batch.is_empty() {
                stop.wait(self.settings.idle_sleep);
                continue;
            }
            trace!(len = batch.len(), "draining batch");

            let mut pending = batch.into_iter();
            while let Some(path) = pending.next() {
                match self.scanner.scan(&path) {
                    Ok(result) => {
                        errors = 0;
                        self.dispatch(&path, &result);
                    }
                    Err(err) => {
                        errors += 1;
                        warn!(path = %path.display(), %err, errors, "scan failed");
                        if errors > self.settings.max_errors {
                            error!(errors, "too many consecutive scan failures, worker stopping");
                            self.requeue(pending);
                            return;
                        }
                        stop.wait(self.settings.idle_sleep);
                    }
                }
                if stop.is_stopped() {
                    self.requeue(pending);
                    break;
                }
            }
        }
    }

    /// Hand unscanned paths back so a restart picks them up.
    fn requeue(&self, pending: impl Iterator<Item = PathBuf>) {
        for path in pending {
            self.queue.push(path);
        }
    }

    fn dispatch(&self, path: &Path, result: &ScanResult) {
        if !result.is_ok() {
            info!(path = %path.display(), viruses = ?result.viruses(), "infection found");
        }
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            if let Err(err) = listener.on_scan(result) {
                warn!(path = %path.display(), %err, "scan listener failed");
            }
        }
    }
}

/// Feeds file events from one or more sources into a [`BoundedEventQueue`]
/// and scans the queued paths on a dedicated worker thread.
pub struct EventRouter {
    intake: Arc<Intake>,
    drain: Drain,
    sources: Vec<Box<dyn EventSource>>,
    subscribed: AtomicBool,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl EventRouter {
    pub fn new(queue: Arc<BoundedEventQueue>, scanner: Arc<dyn Scanner>) -> Self {
        Self {
            intake: Arc::new(Intake {
                queue: Arc::clone(&queue),
                approval: Box::new(ApproveAll),
            }),
            drain: Drain {
                queue,
                scanner,
                listeners: Arc::default(),
                gate: None,
                settings: RouterSettings::default(),
            },
            sources: Vec::new(),
            subscribed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Router over `config.watch`: one recursive-or-not [`NotifySource`]
    /// per root and a [`PrefixApproval`] built from `include`.
    ///
    /// [`NotifySource`]: crate::observation::NotifySource
    pub fn from_config(config: &config::Watch, scanner: Arc<dyn Scanner>) -> Self {
        let queue = Arc::new(BoundedEventQueue::from_config(config));
        let mut router = Self::new(queue, scanner)
            .with_settings(RouterSettings::from_config(config))
            .with_approval(PrefixApproval::from_paths(&config.include));
        for root in &config.roots {
            router = router.with_source(Box::new(crate::observation::NotifySource::new(
                root.clone(),
                config.recursive,
            )));
        }
        router
    }

    pub fn with_approval(mut self, approval: impl PathApproval + 'static) -> Self {
        self.intake = Arc::new(Intake {
            queue: Arc::clone(&self.drain.queue),
            approval: Box::new(approval),
        });
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn ScanGate>) -> Self {
        self.drain.gate = Some(gate);
        self
    }

    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.drain.settings = settings;
        self
    }

    pub fn with_source(mut self, source: Box<dyn EventSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn add_listener(&self, listener: impl ScanListener + 'static) {
        lock(&self.drain.listeners).push(Arc::new(listener));
    }

    pub fn queue(&self) -> &Arc<BoundedEventQueue> {
        &self.drain.queue
    }

    pub fn settings(&self) -> RouterSettings {
        self.drain.settings
    }

    /// Route one event as if a source had delivered it.
    pub fn handle_event(&self, event: &FileEvent) {
        self.intake.on_event(event);
    }

    /// Whether the worker is alive. Turns false after [`close`](Self::close)
    /// or once the worker gave up on repeated failures.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && lock(&self.worker)
                .as_ref()
                .is_some_and(|worker| !worker.is_finished())
    }

    /// Start the sources and the worker. Starting a running router does
    /// nothing. A source that fails to start is reported after the others
    /// are stopped again.
    pub fn start(&self) -> Result<(), Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("event router already running");
            return Ok(());
        }

        if !self.subscribed.swap(true, Ordering::SeqCst) {
            for source in &self.sources {
                source.subscribe(Arc::clone(&self.intake) as Arc<dyn EventSink>);
            }
        }

        let drain = self.drain.clone();
        let worker = Worker::spawn("event-router", move |stop| drain.run(&stop));
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        *lock(&self.worker) = Some(worker);

        for source in &self.sources {
            if let Err(err) = source.start() {
                error!(root = %source.root().display(), %err, "failed to start event source");
                self.close();
                return Err(err);
            }
        }
        info!(sources = self.sources.len(), "event router started");
        Ok(())
    }

    /// Stop the sources and join the worker. Safe to call repeatedly.
    pub fn close(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        for source in &self.sources {
            source.close();
        }
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop();
        }
        info!(pending = self.drain.queue.len(), "event router stopped");
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("queue", &self.drain.queue)
            .field("settings", &self.drain.settings)
            .field("sources", &self.sources.len())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
