//! Quick-action tasks started outside the conversation that the user is still
//! waiting on. Kept per user with a TTL and reconciled by polling the backend.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tether_protocol::TaskStatus;
use tracing::{debug, warn};

use crate::durable::{load_json, save_json, DurableStore, StoreKey};
use crate::error::Result;
use crate::notice::ClientNotice;
use crate::transport::BackendApi;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub task_id: String,
    pub text: String,
    /// Unix millis when the task was started.
    pub timestamp: i64,
}

pub struct PendingTasks {
    store: Arc<dyn DurableStore>,
    user_id: String,
    ttl: Duration,
}

impl PendingTasks {
    pub fn new(store: Arc<dyn DurableStore>, user_id: &str, ttl: Duration) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
            ttl,
        }
    }

    fn key(&self) -> StoreKey {
        StoreKey::pending_tasks(&self.user_id)
    }

    fn load(&self) -> Result<Vec<PendingTask>> {
        Ok(load_json::<Vec<PendingTask>>(self.store.as_ref(), &self.key())?.unwrap_or_default())
    }

    fn save(&self, tasks: &[PendingTask]) -> Result<()> {
        if tasks.is_empty() {
            return self.store.remove(&self.key());
        }
        save_json(self.store.as_ref(), &self.key(), &tasks)
    }

    pub fn add(&self, task_id: &str, text: &str, now: DateTime<Utc>) -> Result<()> {
        let mut tasks = self.live(now)?;
        tasks.retain(|task| task.task_id != task_id);
        tasks.push(PendingTask {
            task_id: task_id.to_string(),
            text: text.to_string(),
            timestamp: now.timestamp_millis(),
        });
        self.save(&tasks)
    }

    pub fn remove(&self, task_id: &str) -> Result<bool> {
        let mut tasks = self.load()?;
        let before = tasks.len();
        tasks.retain(|task| task.task_id != task_id);
        if tasks.len() == before {
            return Ok(false);
        }
        self.save(&tasks)?;
        Ok(true)
    }

    /// Unexpired tasks. Expired entries are pruned from storage on the way.
    pub fn live(&self, now: DateTime<Utc>) -> Result<Vec<PendingTask>> {
        let tasks = self.load()?;
        let cutoff = (now - self.ttl).timestamp_millis();
        let (live, expired): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|task| task.timestamp >= cutoff);
        if !expired.is_empty() {
            debug!(user_id = %self.user_id, expired = expired.len(), "Pruning expired pending tasks");
            self.save(&live)?;
        }
        Ok(live)
    }

    /// Polls each live task and drops the ones that reached a terminal status.
    /// Tasks whose status cannot be fetched stay pending.
    pub fn reconcile(&self, api: &dyn BackendApi, now: DateTime<Utc>) -> Result<Vec<ClientNotice>> {
        let tasks = self.live(now)?;
        let mut notices = Vec::new();
        let mut remaining = Vec::with_capacity(tasks.len());

        for task in tasks {
            match api.task_status(&task.task_id) {
                Ok(status) if status.status.is_terminal() => {
                    notices.push(match status.status {
                        TaskStatus::Failed => ClientNotice::TaskFailed {
                            task_id: task.task_id.clone(),
                            error: status.error,
                        },
                        _ => ClientNotice::TaskCompleted {
                            task_id: task.task_id.clone(),
                            result: status.result,
                        },
                    });
                }
                Ok(_) => remaining.push(task),
                Err(err) => {
                    warn!(task_id = %task.task_id, error = %err, "Failed to poll task status");
                    remaining.push(task);
                }
            }
        }

        if !notices.is_empty() {
            self.save(&remaining)?;
        }
        Ok(notices)
    }
}
