//! In-memory session store.

use super::{SessionStore, StoreOp, StoreResult, WriteBatch};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Process-local [`SessionStore`] backed by a map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no key is stored
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemoryStore {
    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut entries = self.entries();
        for op in batch.ops() {
            match op {
                StoreOp::Put(key, value) => {
                    entries.insert(key.clone(), value.clone());
                }
                StoreOp::Remove(key) => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }
}
