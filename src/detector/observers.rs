use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Phase;

/// Observer invoked with `(old_phase, new_phase)` on every transition
pub type StateChangeCallback = Arc<dyn Fn(Phase, Phase) + Send + Sync>;

/// Identifier handed out by [`ObserverRegistry::register`]; never reused
pub type CallbackId = u64;

/// Insertion-ordered set of transition observers
pub struct ObserverRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(CallbackId, StateChangeCallback)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(Phase, Phase) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove an observer. Returns false if the id is unknown or already removed.
    pub fn remove(&self, id: CallbackId) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|(entry_id, _)| *entry_id == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every observer in registration order, one after another.
    ///
    /// The list is snapshotted first so observers may register or remove
    /// observers without deadlocking. A panicking observer is logged and skipped.
    pub fn notify(&self, old: Phase, new: Phase) {
        let snapshot: Vec<(CallbackId, StateChangeCallback)> = self.lock().clone();

        for (id, callback) in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(old, new))).is_err() {
                tracing::warn!(callback_id = id, %old, %new, "State change observer panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(CallbackId, StateChangeCallback)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
