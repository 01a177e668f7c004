//! Partition Lock
//!
//! Keyed mutual exclusion. At most one holder per key; other callers for the
//! same key wait. Entries exist only while a key is held or awaited.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters
    refs: usize,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Map from key to a reference-counted async mutex.
///
/// The map itself is guarded by a short-held coarse lock; the per-key mutex
/// is what callers wait on.
#[derive(Clone, Default)]
pub struct PartitionLock {
    slots: Slots,
}

impl PartitionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`.
    ///
    /// Dropping the returned future before it resolves gives up the wait
    /// and leaves no entry behind.
    pub async fn lock(&self, key: &str) -> PartitionGuard {
        let (mutex, ticket) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            (
                slot.mutex.clone(),
                Ticket {
                    slots: self.slots.clone(),
                    key: key.to_string(),
                },
            )
        };

        let held = mutex.lock_owned().await;
        PartitionGuard {
            _held: held,
            _ticket: ticket,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One reference to a slot; releases it on drop.
struct Ticket {
    slots: Slots,
    key: String,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// RAII guard for a held key.
///
/// Fields drop in order: the mutex is released before the slot reference.
pub struct PartitionGuard {
    _held: OwnedMutexGuard<()>,
    _ticket: Ticket,
}
