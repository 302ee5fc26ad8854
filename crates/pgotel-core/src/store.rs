//! Holder of the currently published snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::debug;

use crate::snapshot::Snapshot;

/// The single owner of "which snapshot is current".
///
/// Readers load an `Arc` without locking and always see one complete
/// snapshot. Writers serialize on `write_lock`; the last `replace` wins.
#[derive(Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<Snapshot>,
    generation: AtomicU64,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `snapshot` and returns its generation, starting at 1.
    ///
    /// Publication order is call order. `captured_at` is informational only,
    /// so a wall-clock step back never hides a fresh snapshot.
    pub fn replace(&self, snapshot: Snapshot) -> u64 {
        let _guard = self.write_lock.lock();
        let generation = self.generation.load(Ordering::Acquire) + 1;
        debug!(generation, keys = snapshot.len(), "publishing snapshot");
        self.current.store(Some(Arc::new(snapshot)));
        self.generation.store(generation, Ordering::Release);
        generation
    }

    /// The latest published snapshot, `None` before the first publish.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.current.load_full().and_then(|s| s.get(key))
    }

    /// Number of snapshots published so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
