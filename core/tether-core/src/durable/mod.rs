//! Durable client state that must survive a restart.
//!
//! Everything the session engine needs after a reload (the session binding,
//! the rollback baseline, the in-flight stream buffer, pending quick-action
//! tasks) goes through the [`DurableStore`] trait under a namespaced
//! [`StoreKey`].
//!
//! # Shared Resource Policy
//!
//! The store is the only object shared across event handlers, timers and the
//! restart boundary. There is no locking primitive: writes are last-writer-wins
//! per key and every reader validates what it gets back (owning user, session
//! id, staleness) before trusting it.
//!
//! # Module Structure
//!
//! - [`keys`]: key namespacing by user and session
//! - [`memory`]: in-process store for tests and ephemeral clients
//! - [`file`]: JSON file store with atomic writes

mod file;
mod keys;
mod memory;

pub use file::FileStore;
pub use keys::StoreKey;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{Result, TetherError};

pub trait DurableStore {
    fn get(&self, key: &StoreKey) -> Result<Option<String>>;
    fn set(&self, key: &StoreKey, value: &str) -> Result<()>;
    fn remove(&self, key: &StoreKey) -> Result<()>;
}

/// Reads and decodes a JSON value.
///
/// Undecodable values are treated as absent (and logged): a corrupt entry
/// must never be trusted, and must never wedge the client either.
pub fn load_json<T: DeserializeOwned>(store: &dyn DurableStore, key: &StoreKey) -> Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(key = %key, error = %err, "Discarding undecodable durable value");
            Ok(None)
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn DurableStore, key: &StoreKey, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|err| TetherError::Json {
        context: format!("encoding {}", key),
        source: err,
    })?;
    store.set(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u64,
    }

    #[test]
    fn json_helpers_round_trip_and_tolerate_corruption() {
        let store = MemoryStore::new();
        let key = StoreKey::rollback_baseline("alice", "s1");

        assert_eq!(load_json::<Sample>(&store, &key).unwrap(), None);

        save_json(&store, &key, &Sample { value: 3 }).unwrap();
        assert_eq!(
            load_json::<Sample>(&store, &key).unwrap(),
            Some(Sample { value: 3 })
        );

        store.set(&key, "{not json").unwrap();
        assert_eq!(load_json::<Sample>(&store, &key).unwrap(), None);
    }
}
