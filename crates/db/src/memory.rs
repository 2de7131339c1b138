//! In-process [`TaskStore`] for tests and runs without `DATABASE_URL`.
//!
//! Conditional updates are checked and applied under one write lock, which
//! gives the same compare-and-set behaviour as the SQL `status_id = ANY(..)`
//! guard.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use talkvid_core::status::TaskStatus;
use talkvid_core::store::{StoreError, StoreResult, TaskStore};
use talkvid_core::task::{LogEntry, NewTask, Progress, Task, TaskPatch};
use talkvid_core::types::{TaskId, Timestamp};
use tokio::sync::RwLock;

use crate::repositories::task_repo::MAX_LIMIT;

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed record, replacing any task with the same id.
    pub async fn insert(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }
}

fn sorted_oldest_first(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    tasks
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, id: TaskId, input: NewTask) -> StoreResult<TaskId> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&id) {
            return Err(StoreError::Database(format!("duplicate task id {id}")));
        }
        tasks.insert(id.clone(), Task::new(id.clone(), &input, Utc::now()));
        Ok(id)
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let matching = tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect();
        Ok(sorted_oldest_first(matching))
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let matching = tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        let mut newest_first = sorted_oldest_first(matching);
        newest_first.reverse();
        newest_first.truncate(limit.clamp(1, MAX_LIMIT) as usize);
        Ok(newest_first)
    }

    async fn update_task_fields(&self, id: &str, patch: TaskPatch) -> StoreResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(task) => {
                patch.apply_to(task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_task_fields_if(
        &self,
        id: &str,
        expected: &[TaskStatus],
        patch: TaskPatch,
    ) -> StoreResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(task) if expected.contains(&task.status) => {
                patch.apply_to(task);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(&self, id: &str, progress: Progress) -> StoreResult<()> {
        if let Some(task) = self.tasks.write().await.get_mut(id) {
            task.progress = Some(progress);
        }
        Ok(())
    }

    async fn append_log(&self, id: &str, entry: LogEntry) -> StoreResult<()> {
        if let Some(task) = self.tasks.write().await.get_mut(id) {
            task.logs.push(entry);
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn delete_terminal_older_than(&self, cutoff: Timestamp) -> StoreResult<u64> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| {
            !(t.status.is_terminal() && t.ended_at.unwrap_or(t.created_at) < cutoff)
        });
        Ok((before - tasks.len()) as u64)
    }
}
