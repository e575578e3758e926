//! Rollback baseline and server-side truncation.
//!
//! The baseline is the smallest message index still eligible for rollback in a
//! session. It only moves forward while the session is current; it is set to
//! the message count when the user leaves a session and to zero for a
//! brand-new one.

use std::sync::Arc;

use tether_protocol::{RollbackRequest, RollbackResponse};
use tracing::{info, warn};

use crate::durable::{load_json, save_json, DurableStore, StoreKey};
use crate::error::{Result, TetherError};
use crate::transport::BackendApi;

pub struct RollbackController {
    store: Arc<dyn DurableStore>,
    user_id: String,
}

impl RollbackController {
    pub fn new(store: Arc<dyn DurableStore>, user_id: &str) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
        }
    }

    pub fn stored_baseline(&self, session_id: &str) -> Result<Option<u64>> {
        load_json::<u64>(
            self.store.as_ref(),
            &StoreKey::rollback_baseline(&self.user_id, session_id),
        )
    }

    pub fn baseline(&self, session_id: &str) -> Result<u64> {
        Ok(self.stored_baseline(session_id)?.unwrap_or(0))
    }

    /// Raises the baseline; a lower value is ignored.
    pub fn advance_baseline(&self, session_id: &str, message_index: u64) -> Result<u64> {
        let current = self.stored_baseline(session_id)?;
        let next = current.map_or(message_index, |value| value.max(message_index));
        if current != Some(next) {
            self.write(session_id, next)?;
        }
        Ok(next)
    }

    /// A brand-new session: everything in it is rollback-eligible.
    pub fn start_fresh(&self, session_id: &str) -> Result<()> {
        self.write(session_id, 0)
    }

    /// Leaving a session freezes what it holds so far.
    pub fn leave(&self, session_id: &str, message_count: u64) -> Result<u64> {
        self.advance_baseline(session_id, message_count)
    }

    /// Entering an existing session. Without a stored baseline, everything the
    /// server already holds is treated as out of reach.
    pub fn enter(&self, session_id: &str, total_messages: u64) -> Result<u64> {
        match self.stored_baseline(session_id)? {
            Some(baseline) => Ok(baseline),
            None => {
                self.write(session_id, total_messages)?;
                Ok(total_messages)
            }
        }
    }

    pub fn check(&self, session_id: &str, message_index: u64) -> Result<u64> {
        let baseline = self.baseline(session_id)?;
        if message_index < baseline {
            return Err(TetherError::RollbackBelowBaseline {
                index: message_index,
                baseline,
            });
        }
        Ok(baseline)
    }

    /// Asks the backend to truncate at `message_index`. Nothing local changes
    /// here; the caller mirrors a successful truncation.
    pub fn request(
        &self,
        api: &dyn BackendApi,
        session_id: &str,
        message_index: u64,
    ) -> Result<RollbackResponse> {
        self.check(session_id, message_index)?;

        let request = RollbackRequest {
            session_id: session_id.to_string(),
            message_index,
        };
        let response = api.rollback_to_message(&request)?;
        if !response.success {
            let reason = response
                .message
                .clone()
                .unwrap_or_else(|| "rollback failed".to_string());
            warn!(session_id = %session_id, message_index, reason = %reason, "Rollback rejected");
            return Err(TetherError::RollbackRejected(reason));
        }

        info!(
            session_id = %session_id,
            message_index,
            rolled_back_messages = response.rolled_back_messages,
            rolled_back_transactions = response.rolled_back_transactions,
            "Rolled back session"
        );
        Ok(response)
    }

    pub fn forget(&self, session_id: &str) -> Result<()> {
        self.store
            .remove(&StoreKey::rollback_baseline(&self.user_id, session_id))
    }

    fn write(&self, session_id: &str, value: u64) -> Result<()> {
        save_json(
            self.store.as_ref(),
            &StoreKey::rollback_baseline(&self.user_id, session_id),
            &value,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryStore;
    use crate::testing::FakeApi;

    fn controller() -> RollbackController {
        RollbackController::new(Arc::new(MemoryStore::new()), "alice")
    }

    #[test]
    fn baseline_only_moves_forward() {
        let rollback = controller();
        assert_eq!(rollback.baseline("s1").unwrap(), 0);
        assert_eq!(rollback.advance_baseline("s1", 4).unwrap(), 4);
        assert_eq!(rollback.advance_baseline("s1", 2).unwrap(), 4);
        assert_eq!(rollback.leave("s1", 6).unwrap(), 6);
    }

    #[test]
    fn entering_unknown_session_protects_existing_history() {
        let rollback = controller();
        assert_eq!(rollback.enter("s2", 8).unwrap(), 8);
        assert_eq!(rollback.enter("s2", 12).unwrap(), 8);

        rollback.start_fresh("s3").unwrap();
        assert_eq!(rollback.enter("s3", 5).unwrap(), 0);
    }

    #[test]
    fn request_below_baseline_never_reaches_server() {
        let rollback = controller();
        rollback.advance_baseline("s1", 2).unwrap();
        let api = FakeApi::new();

        let err = rollback.request(&api, "s1", 1).expect_err("below baseline");
        assert!(matches!(
            err,
            TetherError::RollbackBelowBaseline {
                index: 1,
                baseline: 2
            }
        ));
        assert!(api.rollback_requests().is_empty());
    }

    #[test]
    fn server_rejection_is_an_error() {
        let rollback = controller();
        let api = FakeApi::new();
        api.set_rollback_response(RollbackResponse {
            success: false,
            rolled_back_messages: 0,
            rolled_back_transactions: 0,
            message: Some("message not found".to_string()),
        });

        let err = rollback.request(&api, "s1", 0).expect_err("rejected");
        assert!(matches!(err, TetherError::RollbackRejected(ref reason) if reason == "message not found"));
        assert_eq!(api.rollback_requests().len(), 1);
    }
}
