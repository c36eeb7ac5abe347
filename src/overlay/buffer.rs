use crate::overlay::model::DetectionSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Latest-wins hand-off of one [`DetectionSet`] between the producer and the
/// compositor.
///
/// The lock only guards an `Arc` swap, so neither side ever holds it across
/// capture, inference or drawing. Readers get a shared handle to a complete
/// set; a publish never mutates a set that a reader may still hold.
pub struct DetectionBuffer {
    current: Mutex<Published>,
    version: AtomicU64,
}

struct Published {
    set: Arc<DetectionSet>,
    version: u64,
}

impl Default for DetectionBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionBuffer {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Published {
                set: Arc::new(DetectionSet::empty()),
                version: 0,
            }),
            version: AtomicU64::new(0),
        }
    }

    /// Replaces the visible set. The previous set is released outside the lock.
    pub fn publish(&self, set: DetectionSet) {
        let next = Arc::new(set);
        let previous = {
            let mut current = self.lock();
            let version = current.version + 1;
            current.version = version;
            self.version.store(version, Ordering::Release);
            std::mem::replace(&mut current.set, next)
        };
        drop(previous);
    }

    pub fn snapshot(&self) -> Arc<DetectionSet> {
        Arc::clone(&self.lock().set)
    }

    /// Snapshot together with the version it was published under.
    pub fn snapshot_with_version(&self) -> (Arc<DetectionSet>, u64) {
        let current = self.lock();
        (Arc::clone(&current.set), current.version)
    }

    /// Number of publishes so far; readable without taking the lock.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.publish(DetectionSet::empty());
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        // Every critical section is a plain field swap, so a poisoned guard
        // still holds a whole set.
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
