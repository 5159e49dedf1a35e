//! Per-record write locks.
//!
//! Every operation that changes a record's lifecycle state or location
//! (soft-delete, restore, the delete-on-access side effect, and the
//! migration commit) runs while holding that record's lock, so at most
//! one writer touches a given record at a time.  Unrelated records never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use crate::metadata::store::FileId;

#[derive(Default)]
pub struct RecordLocks {
    slots: Mutex<HashMap<FileId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held while a record is being written.  Dropping it releases the lock.
pub struct RecordGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to record `id`.
    pub async fn lock(&self, id: FileId) -> RecordGuard {
        let slot = {
            let mut slots = self.slots.lock().expect("mutex poisoned");
            // Drop slots nobody holds or waits on so the map stays small.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(id).or_default().clone()
        };
        RecordGuard {
            _guard: slot.lock_owned().await,
        }
    }

    /// Number of records with a live lock slot.
    pub fn tracked(&self) -> usize {
        self.slots.lock().expect("mutex poisoned").len()
    }
}
