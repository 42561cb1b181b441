#![forbid(unsafe_code)]

use crate::error::Error;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// One-shot stop flag that also interrupts sleeps.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn stop(&self) {
        *self.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `timeout` unless stopped first. Returns whether a stop was
    /// requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.lock();
        loop {
            if *stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match self.cond.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        match self.stopped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A named background thread paired with its stop signal.
#[derive(Debug)]
pub(crate) struct Worker {
    name: &'static str,
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<Self, Error>
    where
        F: FnOnce(Arc<StopSignal>) + Send + 'static,
    {
        let stop = Arc::new(StopSignal::default());
        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(name.into())
                .spawn(move || body(stop))
                .map_err(|source| Error::Spawn { name, source })?
        };
        Ok(Self { name, stop, handle })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the thread and wait for it to exit.
    pub(crate) fn stop(self) {
        self.stop.stop();
        if self.handle.join().is_err() {
            warn!(name = self.name, "worker thread panicked");
        } else {
            trace!(name = self.name, "worker thread exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_early_on_stop() {
        let signal = Arc::new(StopSignal::default());
        let waiter = {
            let signal = signal.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let stopped = signal.wait(Duration::from_secs(30));
                (stopped, start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        signal.stop();
        let (stopped, elapsed) = waiter.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(10));
    }

    #[test]
    fn wait_times_out_without_stop() {
        let signal = StopSignal::default();
        assert!(!signal.wait(Duration::from_millis(10)));
        assert!(!signal.is_stopped());
    }

    #[test]
    fn worker_stops_its_loop() {
        let worker = Worker::spawn("test-worker", |stop| while !stop.wait(Duration::from_secs(60)) {})
            .unwrap();
        assert!(!worker.is_finished());
        worker.stop();
    }
}
