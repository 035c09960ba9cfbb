//! Process-local marker store.

use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use super::{MarkerStore, PersistError, PersistResult};

/// In-memory [`MarkerStore`]. Clones share the same map, which lets a test
/// play the role of a page reload by handing a clone to a fresh engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryMarkerStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryMarkerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PersistResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| PersistError::Message("marker store lock poisoned".to_string()))
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn get(&self, key: &str) -> PersistResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> PersistResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> PersistResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
