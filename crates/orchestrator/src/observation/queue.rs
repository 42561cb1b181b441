#![forbid(unsafe_code)]

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{trace, warn};

pub const MIN_CAPACITY: usize = 5;
pub const MAX_CAPACITY: usize = 100_000;
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
struct Inner {
    /// Pending paths keyed by push sequence, oldest first.
    order: BTreeMap<u64, PathBuf>,
    /// Sequence of each pending path.
    index: FxHashMap<PathBuf, u64>,
    next_seq: u64,
    overflow: u64,
}

impl Inner {
    fn pop_front(&mut self) -> Option<PathBuf> {
        let (_, path) = self.order.pop_first()?;
        self.index.remove(&path);
        Some(path)
    }

    fn remove(&mut self, path: &Path) -> bool {
        match self.index.remove(path) {
            Some(seq) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }
}

/// Bounded set of paths waiting to be scanned.
///
/// Pushing a path that is already queued moves it to the back, so a burst
/// of events for one file costs a single scan. When full, the oldest paths
/// are dropped and the overflow counter is bumped. Nothing here blocks.
#[derive(Debug)]
pub struct BoundedEventQueue {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for BoundedEventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BoundedEventQueue {
    /// `capacity` is clamped to [`MIN_CAPACITY`]..=[`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let clamped = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
        if clamped != capacity {
            warn!(requested = capacity, capacity = clamped, "queue capacity clamped");
        }
        Self {
            capacity: clamped,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn from_config(config: &config::Watch) -> Self {
        Self::new(config.queue_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut inner = self.lock();

        if let Some(seq) = inner.index.remove(&path) {
            inner.order.remove(&seq);
        }

        if inner.order.len() >= self.capacity {
            let mut evicted = 0usize;
            while inner.order.len() >= self.capacity {
                if inner.pop_front().is_none() {
                    break;
                }
                evicted += 1;
            }
            inner.overflow += 1;
            trace!(evicted, overflow = inner.overflow, "queue full, dropped oldest");
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, path.clone());
        inner.index.insert(path, seq);
    }

    pub fn pop(&self) -> Option<PathBuf> {
        self.lock().pop_front()
    }

    /// Like [`pop`](Self::pop), but silently drops paths that no longer
    /// exist on disk.
    pub fn pop_existing(&self) -> Option<PathBuf> {
        loop {
            let path = self.pop()?;
            if path.exists() {
                return Some(path);
            }
            trace!(path = %path.display(), "dropping vanished path");
        }
    }

    /// Pop up to `max` paths, fewer if the queue runs dry.
    pub fn pop_batch(&self, max: usize, existing_only: bool) -> Vec<PathBuf> {
        let mut batch = Vec::with_capacity(max.min(self.capacity));
        while batch.len() < max {
            let next = if existing_only {
                self.pop_existing()
            } else {
                self.pop()
            };
            match next {
                Some(path) => batch.push(path),
                None => break,
            }
        }
        batch
    }

    /// Drop a pending path. Returns whether it was queued.
    pub fn remove(&self, path: &Path) -> bool {
        self.lock().remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }

    /// Pending paths, oldest first.
    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.lock().order.values().cloned().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.order.clear();
        inner.index.clear();
    }

    /// Number of pushes that had to drop older paths.
    pub fn overflow_count(&self) -> u64 {
        self.lock().overflow
    }

    /// Reset the overflow counter, returning its previous value.
    pub fn reset_overflow_count(&self) -> u64 {
        std::mem::take(&mut self.lock().overflow)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(BoundedEventQueue::new(0).capacity(), MIN_CAPACITY);
        assert_eq!(BoundedEventQueue::new(usize::MAX).capacity(), MAX_CAPACITY);
        assert_eq!(BoundedEventQueue::default().capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn repeated_push_coalesces_to_tail() {
        let queue = BoundedEventQueue::new(10);
        queue.push("/a");
        queue.push("/p");
        queue.push("/b");
        queue.push("/p");
        queue.push("/p");

        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.to_vec(),
            [PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/p")]
        );
    }

    #[test]
    fn overflow_evicts_oldest() {
        let capacity = 5;
        let extra = 3;
        let queue = BoundedEventQueue::new(capacity);
        for i in 0..capacity + extra {
            queue.push(format!("/f{i}"));
        }

        assert_eq!(queue.len(), capacity);
        assert_eq!(queue.overflow_count(), extra as u64);
        for i in 0..extra {
            assert!(!queue.contains(Path::new(&format!("/f{i}"))));
        }
        assert_eq!(queue.pop(), Some(PathBuf::from(format!("/f{extra}"))));

        assert_eq!(queue.reset_overflow_count(), extra as u64);
        assert_eq!(queue.overflow_count(), 0);
    }

    #[test]
    fn pushing_queued_path_into_full_queue_does_not_evict() {
        let queue = BoundedEventQueue::new(5);
        for i in 0..5 {
            queue.push(format!("/f{i}"));
        }
        queue.push("/f0");
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.overflow_count(), 0);
        assert_eq!(queue.pop(), Some(PathBuf::from("/f1")));
    }

    #[test]
    fn remove_cancels_pending_path() {
        let queue = BoundedEventQueue::new(10);
        queue.push("/p");
        assert!(queue.remove(Path::new("/p")));
        assert!(!queue.remove(Path::new("/p")));
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn existing_only_pop_skips_deleted_files() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = ["one", "two", "three"]
            .iter()
            .map(|name| dir.path().join(name))
            .collect();
        let queue = BoundedEventQueue::new(10);
        for path in &paths {
            std::fs::write(path, b"data").unwrap();
            queue.push(path.clone());
        }
        std::fs::remove_file(&paths[1]).unwrap();

        assert_eq!(queue.pop_existing(), Some(paths[0].clone()));
        assert_eq!(queue.pop_existing(), Some(paths[2].clone()));
        assert_eq!(queue.pop_existing(), None);
    }

    #[test]
    fn batch_pop_returns_what_is_available() {
        let dir = tempdir().unwrap();
        let queue = BoundedEventQueue::new(10);
        let kept = dir.path().join("kept");
        std::fs::write(&kept, b"x").unwrap();
        queue.push(dir.path().join("gone"));
        queue.push(kept.clone());
        queue.push(dir.path().join("also-gone"));

        assert_eq!(queue.pop_batch(100, true), [kept]);
        assert!(queue.is_empty());

        queue.push("/x");
        queue.push("/y");
        queue.push("/z");
        assert_eq!(queue.pop_batch(2, false), [PathBuf::from("/x"), PathBuf::from("/y")]);
        assert_eq!(queue.pop_batch(2, false), [PathBuf::from("/z")]);
        assert!(queue.pop_batch(2, false).is_empty());
    }

    #[test]
    fn clear_keeps_overflow_count() {
        let queue = BoundedEventQueue::new(5);
        for i in 0..6 {
            queue.push(format!("/f{i}"));
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.overflow_count(), 1);
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        let queue = Arc::new(BoundedEventQueue::new(50));
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..10_000 {
                    queue.push(format!("/f{}", i % 200));
                }
            })
        };
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut popped = 0usize;
                for _ in 0..10_000 {
                    popped += queue.pop_batch(10, false).len();
                    assert!(queue.len() <= 50);
                }
                popped
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();
        assert!(queue.len() <= 50);
        let pending = queue.to_vec();
        let unique: std::collections::HashSet<_> = pending.iter().collect();
        assert_eq!(unique.len(), pending.len());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u8),
        Remove(u8),
        Pop,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..30).prop_map(Op::Push),
            1 => (0u8..30).prop_map(Op::Remove),
            2 => Just(Op::Pop),
        ]
    }

    fn path_of(id: u8) -> PathBuf {
        PathBuf::from(format!("/p/{id}"))
    }

    proptest! {
        #[test]
        fn matches_reference_model(
            capacity in MIN_CAPACITY..20,
            ops in prop::collection::vec(op_strategy(), 0..300),
        ) {
            let queue = BoundedEventQueue::new(capacity);
            let mut model: VecDeque<PathBuf> = VecDeque::new();
            let mut overflow = 0u64;

            for op in ops {
                match op {
                    Op::Push(id) => {
                        let path = path_of(id);
                        model.retain(|p| p != &path);
                        if model.len() >= capacity {
                            while model.len() >= capacity {
                                model.pop_front();
                            }
                            overflow += 1;
                        }
                        model.push_back(path.clone());
                        queue.push(path);
                    }
                    Op::Remove(id) => {
                        let path = path_of(id);
                        let expected = model.contains(&path);
                        model.retain(|p| p != &path);
                        prop_assert_eq!(queue.remove(&path), expected);
                    }
                    Op::Pop => {
                        prop_assert_eq!(queue.pop(), model.pop_front());
                    }
                }
                prop_assert!(queue.len() <= capacity);
            }

            prop_assert_eq!(queue.to_vec(), Vec::from(model));
            prop_assert_eq!(queue.overflow_count(), overflow);
        }
    }
}
