use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{DurableStore, StoreKey};
use crate::error::Result;

/// In-process store. Cloning the `Arc` around it lets a test inspect exactly
/// what the client persisted, and a second client built on the same instance
/// behaves like a reload.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        Ok(self.lock().get(key.as_str()).cloned())
    }

    fn set(&self, key: &StoreKey, value: &str) -> Result<()> {
        self.lock()
            .insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &StoreKey) -> Result<()> {
        self.lock().remove(key.as_str());
        Ok(())
    }
}
