//! PostgreSQL-backed [`TaskStore`].

use async_trait::async_trait;
use talkvid_core::status::TaskStatus;
use talkvid_core::store::{StoreError, StoreResult, TaskStore};
use talkvid_core::task::{LogEntry, NewTask, Progress, Task, TaskPatch};
use talkvid_core::types::{TaskId, Timestamp};

use crate::models::task::TaskRow;
use crate::repositories::TaskRepo;
use crate::DbPool;

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn into_tasks(rows: Vec<TaskRow>) -> StoreResult<Vec<Task>> {
    rows.into_iter().map(Task::try_from).collect()
}

/// [`TaskStore`] over a shared connection pool.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: DbPool,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, id: TaskId, input: NewTask) -> StoreResult<TaskId> {
        let row = TaskRepo::create(&self.pool, &id, &input).await.map_err(db_err)?;
        Ok(row.id)
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        TaskRepo::find_by_id(&self.pool, id)
            .await
            .map_err(db_err)?
            .map(Task::try_from)
            .transpose()
    }

    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> StoreResult<Vec<Task>> {
        let rows = TaskRepo::list_by_status(&self.pool, statuses)
            .await
            .map_err(db_err)?;
        into_tasks(rows)
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> StoreResult<Vec<Task>> {
        let rows = TaskRepo::list(&self.pool, status, limit).await.map_err(db_err)?;
        into_tasks(rows)
    }

    async fn update_task_fields(&self, id: &str, patch: TaskPatch) -> StoreResult<bool> {
        TaskRepo::update_fields(&self.pool, id, &patch)
            .await
            .map_err(db_err)
    }

    async fn update_task_fields_if(
        &self,
        id: &str,
        expected: &[TaskStatus],
        patch: TaskPatch,
    ) -> StoreResult<bool> {
        TaskRepo::update_fields_if(&self.pool, id, expected, &patch)
            .await
            .map_err(db_err)
    }

    async fn update_progress(&self, id: &str, progress: Progress) -> StoreResult<()> {
        TaskRepo::update_progress(&self.pool, id, &progress)
            .await
            .map_err(db_err)
    }

    async fn append_log(&self, id: &str, entry: LogEntry) -> StoreResult<()> {
        TaskRepo::append_log(&self.pool, id, &entry)
            .await
            .map_err(db_err)
    }

    async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        TaskRepo::delete(&self.pool, id).await.map_err(db_err)
    }

    async fn delete_terminal_older_than(&self, cutoff: Timestamp) -> StoreResult<u64> {
        TaskRepo::delete_terminal_older_than(&self.pool, cutoff)
            .await
            .map_err(db_err)
    }
}
