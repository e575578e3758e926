use std::fmt;

const PREFIX: &str = "tether";

/// A durable key namespaced by user (and session, where the value is
/// per-session), so two users sharing one storage medium never observe each
/// other's state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn session_id(user_id: &str) -> Self {
        StoreKey(format!("{}:session-id:{}", PREFIX, user_id))
    }

    pub fn rollback_baseline(user_id: &str, session_id: &str) -> Self {
        StoreKey(format!(
            "{}:rollback-baseline:{}:{}",
            PREFIX, user_id, session_id
        ))
    }

    pub fn stream_state(user_id: &str, session_id: &str) -> Self {
        StoreKey(format!("{}:stream-state:{}:{}", PREFIX, user_id, session_id))
    }

    pub fn pending_tasks(user_id: &str) -> Self {
        StoreKey(format!("{}:pending-tasks:{}", PREFIX, user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
