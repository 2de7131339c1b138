//! Store wrapper that injects write failures and competing writers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use talkvid_core::status::TaskStatus;
use talkvid_core::store::{StoreError, StoreResult, TaskStore};
use talkvid_core::task::{LogEntry, NewTask, Progress, Task, TaskPatch};
use talkvid_core::types::{TaskId, Timestamp};
use talkvid_db::MemoryTaskStore;

#[derive(Default)]
pub(crate) struct ScriptedStore {
    pub inner: Arc<MemoryTaskStore>,
    /// Next conditional write setting this status fails once.
    failing: Mutex<Vec<TaskStatus>>,
    /// Before a conditional write setting `.0`, force the task to `.1`.
    overtaken: Mutex<Vec<(TaskStatus, TaskStatus)>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_once(&self, status: TaskStatus) {
        self.failing.lock().unwrap().push(status);
    }

    pub fn overtake(&self, target: TaskStatus, winner: TaskStatus) {
        self.overtaken.lock().unwrap().push((target, winner));
    }

    fn take_failure(&self, status: Option<TaskStatus>) -> bool {
        let mut failing = self.failing.lock().unwrap();
        match failing.iter().position(|s| Some(*s) == status) {
            Some(i) => {
                failing.remove(i);
                true
            }
            None => false,
        }
    }

    fn take_winner(&self, status: Option<TaskStatus>) -> Option<TaskStatus> {
        let mut overtaken = self.overtaken.lock().unwrap();
        let i = overtaken.iter().position(|(target, _)| Some(*target) == status)?;
        Some(overtaken.remove(i).1)
    }
}

#[async_trait]
impl TaskStore for ScriptedStore {
    async fn create_task(&self, id: TaskId, input: NewTask) -> StoreResult<TaskId> {
        self.inner.create_task(id, input).await
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        self.inner.get_task(id).await
    }

    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> StoreResult<Vec<Task>> {
        self.inner.list_tasks_by_status(statuses).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> StoreResult<Vec<Task>> {
        self.inner.list_tasks(status, limit).await
    }

    async fn update_task_fields(&self, id: &str, patch: TaskPatch) -> StoreResult<bool> {
        self.inner.update_task_fields(id, patch).await
    }

    async fn update_task_fields_if(
        &self,
        id: &str,
        expected: &[TaskStatus],
        patch: TaskPatch,
    ) -> StoreResult<bool> {
        if self.take_failure(patch.status) {
            return Err(StoreError::Database("connection reset".into()));
        }
        if let Some(winner) = self.take_winner(patch.status) {
            let forced = TaskPatch {
                status: Some(winner),
                ..TaskPatch::default()
            };
            self.inner.update_task_fields(id, forced).await?;
        }
        self.inner.update_task_fields_if(id, expected, patch).await
    }

    async fn update_progress(&self, id: &str, progress: Progress) -> StoreResult<()> {
        self.inner.update_progress(id, progress).await
    }

    async fn append_log(&self, id: &str, entry: LogEntry) -> StoreResult<()> {
        self.inner.append_log(id, entry).await
    }

    async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete_task(id).await
    }

    async fn delete_terminal_older_than(&self, cutoff: Timestamp) -> StoreResult<u64> {
        self.inner.delete_terminal_older_than(cutoff).await
    }
}
