//! Session registry: which session is current for a user.
//!
//! The binding is stored as `(session_id, user_id, bound_at)`. A binding read
//! back from storage is trusted only if its `user_id` matches the caller; a
//! mismatched, corrupt or missing binding yields a brand-new session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::durable::{load_json, save_json, DurableStore, StoreKey};
use crate::error::Result;

const SESSION_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    pub session_id: String,
    pub user_id: String,
    pub bound_at: DateTime<Utc>,
}

pub struct SessionRegistry {
    store: Arc<dyn DurableStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// The validated binding for `user_id`, if one exists.
    pub fn current(&self, user_id: &str) -> Result<Option<SessionBinding>> {
        let key = StoreKey::session_id(user_id);
        let Some(binding) = load_json::<SessionBinding>(self.store.as_ref(), &key)? else {
            return Ok(None);
        };

        if binding.user_id != user_id {
            warn!(
                user_id = %user_id,
                stored_user_id = %binding.user_id,
                "Discarding session binding owned by another user"
            );
            return Ok(None);
        }
        if binding.session_id.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(binding))
    }

    pub fn resolve_session(&self, user_id: &str, now: DateTime<Utc>) -> Result<String> {
        if let Some(binding) = self.current(user_id)? {
            debug!(user_id = %user_id, session_id = %binding.session_id, "Resumed session binding");
            return Ok(binding.session_id);
        }
        self.create_session(user_id, now)
    }

    pub fn create_session(&self, user_id: &str, now: DateTime<Utc>) -> Result<String> {
        let session_id = generate_session_id(now);
        self.bind(user_id, &session_id, now)?;
        info!(user_id = %user_id, session_id = %session_id, "Created session");
        Ok(session_id)
    }

    /// Makes an existing session current (switch).
    pub fn activate(&self, user_id: &str, session_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.bind(user_id, session_id, now)?;
        info!(user_id = %user_id, session_id = %session_id, "Activated session");
        Ok(())
    }

    fn bind(&self, user_id: &str, session_id: &str, now: DateTime<Utc>) -> Result<()> {
        let binding = SessionBinding {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            bound_at: now,
        };
        save_json(self.store.as_ref(), &StoreKey::session_id(user_id), &binding)
    }
}

/// `session_<unix-millis>_<random suffix>`.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("session_{}_{}", now.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, SessionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(store.clone());
        (store, registry)
    }

    #[test]
    fn resolve_creates_then_reuses() {
        let (_store, registry) = registry();
        let now = Utc::now();

        let first = registry.resolve_session("alice", now).unwrap();
        let second = registry.resolve_session("alice", now).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(&format!("session_{}_", now.timestamp_millis())));
    }

    #[test]
    fn binding_for_another_user_is_never_returned() {
        let (store, registry) = registry();
        let now = Utc::now();
        let foreign = SessionBinding {
            session_id: "session_bob".to_string(),
            user_id: "bob".to_string(),
            bound_at: now,
        };
        // Simulates a shared medium where alice's slot holds bob's binding.
        save_json(store.as_ref(), &StoreKey::session_id("alice"), &foreign).unwrap();

        let resolved = registry.resolve_session("alice", now).unwrap();
        assert_ne!(resolved, "session_bob");

        let binding = registry.current("alice").unwrap().expect("rebound");
        assert_eq!(binding.user_id, "alice");
        assert_eq!(binding.session_id, resolved);
    }

    #[test]
    fn users_do_not_share_sessions() {
        let (_store, registry) = registry();
        let now = Utc::now();
        let alice = registry.resolve_session("alice", now).unwrap();
        let bob = registry.resolve_session("bob", now).unwrap();
        assert_ne!(alice, bob);
    }

    #[test]
    fn corrupt_binding_yields_fresh_session() {
        let (store, registry) = registry();
        store
            .set(&StoreKey::session_id("alice"), "not json")
            .unwrap();

        let resolved = registry.resolve_session("alice", Utc::now()).unwrap();
        assert!(resolved.starts_with("session_"));
        assert_eq!(
            registry.current("alice").unwrap().map(|b| b.session_id),
            Some(resolved)
        );
    }

    #[test]
    fn create_always_mints_new_id_and_activate_rebinds() {
        let (_store, registry) = registry();
        let now = Utc::now();
        let first = registry.create_session("alice", now).unwrap();
        let second = registry.create_session("alice", now).unwrap();
        assert_ne!(first, second);

        registry.activate("alice", &first, now).unwrap();
        assert_eq!(registry.resolve_session("alice", now).unwrap(), first);
    }

    #[test]
    fn generated_ids_have_lowercase_suffix() {
        let id = generate_session_id(Utc::now());
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), SESSION_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
