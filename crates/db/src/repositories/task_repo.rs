//! Repository for the `tasks` table.
//!
//! Status transitions that can race (claim, launch, terminal writes) go
//! through [`TaskRepo::update_fields_if`], which only touches rows whose
//! current status is in the expected set.

use sqlx::types::Json;
use sqlx::PgPool;
use talkvid_core::status::{StatusId, TaskStatus, TERMINAL_STATUSES};
use talkvid_core::task::{LogEntry, NewTask, Progress, TaskPatch};
use talkvid_core::types::Timestamp;

use crate::models::task::TaskRow;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, status_id, prompt, image_path, audio_path, \
    pid, command, log_path, job_spec_path, output_path, download_url, \
    error_message, created_at, started_at, ended_at, uptime_secs, \
    progress, logs";

/// Maximum page size for task listing.
pub const MAX_LIMIT: i64 = 500;

/// Shared SET clause for partial updates. `$1` is the task id; `ended_at`
/// keeps its first value.
const PATCH_SET: &str = "\
    status_id     = COALESCE($2, status_id), \
    pid           = COALESCE($3, pid), \
    command       = COALESCE($4, command), \
    log_path      = COALESCE($5, log_path), \
    job_spec_path = COALESCE($6, job_spec_path), \
    output_path   = COALESCE($7, output_path), \
    download_url  = COALESCE($8, download_url), \
    error_message = COALESCE($9, error_message), \
    started_at    = COALESCE($10, started_at), \
    ended_at      = COALESCE(ended_at, $11), \
    uptime_secs   = COALESCE($12, uptime_secs)";

fn status_ids(statuses: &[TaskStatus]) -> Vec<StatusId> {
    statuses.iter().map(|s| s.id()).collect()
}

/// Provides CRUD operations for generation tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new `pending` task.
    pub async fn create(pool: &PgPool, id: &str, input: &NewTask) -> Result<TaskRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (id, status_id, prompt, image_path, audio_path) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .bind(TaskStatus::Pending.id())
            .bind(&input.prompt)
            .bind(&input.image_path)
            .bind(&input.audio_path)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Tasks in any of `statuses`, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status_id = ANY($1) \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(status_ids(statuses))
            .fetch_all(pool)
            .await
    }

    /// Newest first, optionally filtered by status. `limit` is clamped to
    /// `1..=MAX_LIMIT`.
    pub async fn list(
        pool: &PgPool,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE ($1::SMALLINT IS NULL OR status_id = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(status.map(TaskStatus::id))
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }

    /// Apply a partial update unconditionally. Returns `true` if a row matched.
    pub async fn update_fields(
        pool: &PgPool,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<bool, sqlx::Error> {
        let query = format!("UPDATE tasks SET {PATCH_SET} WHERE id = $1");
        let result = bind_patch(sqlx::query(&query).bind(id), patch)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a partial update only while `status_id` is one of `expected`.
    pub async fn update_fields_if(
        pool: &PgPool,
        id: &str,
        expected: &[TaskStatus],
        patch: &TaskPatch,
    ) -> Result<bool, sqlx::Error> {
        let query = format!("UPDATE tasks SET {PATCH_SET} WHERE id = $1 AND status_id = ANY($13)");
        let result = bind_patch(sqlx::query(&query).bind(id), patch)
            .bind(status_ids(expected))
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_progress(
        pool: &PgPool,
        id: &str,
        progress: &Progress,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET progress = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(progress))
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Append one entry to the task's `logs` array.
    pub async fn append_log(pool: &PgPool, id: &str, entry: &LogEntry) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET logs = logs || $2::jsonb WHERE id = $1")
            .bind(id)
            .bind(Json([entry]))
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete terminal tasks whose end (or creation, if never ended) is
    /// before `cutoff`. Returns the number of rows removed.
    pub async fn delete_terminal_older_than(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM tasks \
             WHERE status_id = ANY($1) \
               AND COALESCE(ended_at, created_at) < $2",
        )
        .bind(status_ids(&TERMINAL_STATUSES))
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Bind `$2..=$12` of [`PATCH_SET`] from `patch`.
fn bind_patch<'q>(query: PgQuery<'q>, patch: &TaskPatch) -> PgQuery<'q> {
    query
        .bind(patch.status.map(TaskStatus::id))
        .bind(patch.pid)
        .bind(patch.command.clone().map(Json))
        .bind(patch.log_path.clone())
        .bind(patch.job_spec_path.clone())
        .bind(patch.output_path.clone())
        .bind(patch.download_url.clone())
        .bind(patch.error_message.clone())
        .bind(patch.started_at)
        .bind(patch.ended_at)
        .bind(patch.uptime_secs)
}
