//! Store-backed concurrency limit.
//!
//! Counting active rows instead of in-memory slots keeps the limit intact
//! across supervisor restarts.

use std::sync::Arc;

use talkvid_core::status::ACTIVE_STATUSES;
use talkvid_core::store::{StoreResult, TaskStore};

pub struct Admission {
    store: Arc<dyn TaskStore>,
    limit: usize,
}

impl Admission {
    pub fn new(store: Arc<dyn TaskStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of tasks in `processing` or `running`.
    pub async fn active_count(&self) -> StoreResult<usize> {
        Ok(self.store.list_tasks_by_status(&ACTIVE_STATUSES).await?.len())
    }

    /// `true` while fewer than `limit` tasks are active.
    pub async fn can_dispatch(&self) -> StoreResult<bool> {
        Ok(self.active_count().await? < self.limit)
    }
}
