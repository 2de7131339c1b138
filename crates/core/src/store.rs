//! Persistence contract for task records.
//!
//! The scheduler, monitors, and cancellation all go through this trait; the
//! store is the only source of truth for active and terminal state.

use async_trait::async_trait;

use crate::status::TaskStatus;
use crate::task::{LogEntry, NewTask, Progress, Task, TaskPatch};
use crate::types::{TaskId, Timestamp};

/// Errors raised by a [`TaskStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt task record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Insert a new `pending` task and return its id.
    async fn create_task(&self, id: TaskId, input: NewTask) -> StoreResult<TaskId>;

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>>;

    /// Tasks in any of `statuses`, oldest first.
    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> StoreResult<Vec<Task>>;

    /// Newest first, optionally filtered by status.
    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> StoreResult<Vec<Task>>;

    /// Unconditional partial update. Returns `false` if the task is gone.
    async fn update_task_fields(&self, id: &str, patch: TaskPatch) -> StoreResult<bool>;

    /// Apply `patch` only while the task's status is one of `expected`.
    ///
    /// Returns `true` when the row was updated.
    async fn update_task_fields_if(
        &self,
        id: &str,
        expected: &[TaskStatus],
        patch: TaskPatch,
    ) -> StoreResult<bool>;

    async fn update_progress(&self, id: &str, progress: Progress) -> StoreResult<()>;

    async fn append_log(&self, id: &str, entry: LogEntry) -> StoreResult<()>;

    async fn delete_task(&self, id: &str) -> StoreResult<bool>;

    /// Delete terminal tasks that ended before `cutoff`. Returns the count removed.
    async fn delete_terminal_older_than(&self, cutoff: Timestamp) -> StoreResult<u64>;
}
