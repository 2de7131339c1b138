//! Row model for the `tasks` table.

use sqlx::types::Json;
use sqlx::FromRow;
use talkvid_core::status::{StatusId, TaskStatus};
use talkvid_core::store::StoreError;
use talkvid_core::task::{LogEntry, Progress, Task};
use talkvid_core::types::Timestamp;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub status_id: StatusId,
    pub prompt: String,
    pub image_path: String,
    pub audio_path: String,
    pub pid: Option<i32>,
    pub command: Option<Json<Vec<String>>>,
    pub log_path: Option<String>,
    pub job_spec_path: Option<String>,
    pub output_path: Option<String>,
    pub download_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub uptime_secs: Option<f64>,
    pub progress: Option<Json<Progress>>,
    pub logs: Json<Vec<LogEntry>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_id(row.status_id).ok_or_else(|| StoreError::Corrupt {
            id: row.id.clone(),
            reason: format!("unknown status_id {}", row.status_id),
        })?;
        Ok(Task {
            id: row.id,
            status,
            prompt: row.prompt,
            image_path: row.image_path,
            audio_path: row.audio_path,
            pid: row.pid,
            command: row.command.map(|c| c.0),
            log_path: row.log_path,
            job_spec_path: row.job_spec_path,
            output_path: row.output_path,
            download_url: row.download_url,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            uptime_secs: row.uptime_secs,
            progress: row.progress.map(|p| p.0),
            logs: row.logs.0,
        })
    }
}
