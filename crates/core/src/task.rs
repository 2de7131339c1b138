//! Task entity, partial-update patch, and the client-facing view.

use serde::{Deserialize, Serialize};

use crate::status::TaskStatus;
use crate::types::{TaskId, Timestamp};

/// Number of log entries included in a [`TaskView`].
pub const VIEW_LOG_ENTRIES: usize = 20;

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub prompt: String,
    pub image_path: String,
    pub audio_path: String,
    /// Set only after a successful spawn.
    pub pid: Option<i32>,
    pub command: Option<Vec<String>>,
    pub log_path: Option<String>,
    pub job_spec_path: Option<String>,
    pub output_path: Option<String>,
    pub download_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    /// Set exactly once, on the first terminal transition.
    pub ended_at: Option<Timestamp>,
    pub uptime_secs: Option<f64>,
    pub progress: Option<Progress>,
    /// Append-only lifecycle log.
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Task {
    /// Build a fresh `pending` task.
    pub fn new(id: TaskId, input: &NewTask, created_at: Timestamp) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            prompt: input.prompt.clone(),
            image_path: input.image_path.clone(),
            audio_path: input.audio_path.clone(),
            pid: None,
            command: None,
            log_path: None,
            job_spec_path: None,
            output_path: None,
            download_url: None,
            error_message: None,
            created_at,
            started_at: None,
            ended_at: None,
            uptime_secs: None,
            progress: None,
            logs: Vec::new(),
        }
    }

    /// Seconds since `started_at`, or the persisted uptime once terminal.
    pub fn uptime_at(&self, now: Timestamp) -> Option<f64> {
        if self.status.is_terminal() {
            return self.uptime_secs;
        }
        self.started_at.map(|started| seconds_between(started, now))
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub prompt: String,
    pub image_path: String,
    pub audio_path: String,
}

/// Coarse progress snapshot shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: String,
    pub percent: i16,
    pub message: String,
    pub updated_at: Timestamp,
}

/// One entry of the task's lifecycle log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub level: String,
    pub message: String,
}

/// Partial update: only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub pid: Option<i32>,
    pub command: Option<Vec<String>>,
    pub log_path: Option<String>,
    pub job_spec_path: Option<String>,
    pub output_path: Option<String>,
    pub download_url: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub uptime_secs: Option<f64>,
}

impl TaskPatch {
    /// Patch that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Terminal transition: status, `ended_at`, and the final uptime.
    pub fn terminal(
        status: TaskStatus,
        ended_at: Timestamp,
        started_at: Option<Timestamp>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            status: Some(status),
            ended_at: Some(ended_at),
            uptime_secs: started_at.map(|s| seconds_between(s, ended_at)),
            error_message,
            ..Self::default()
        }
    }

    /// Write every `Some` field into `task`.
    ///
    /// `ended_at` is only written when the task has none yet.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(pid) = self.pid {
            task.pid = Some(pid);
        }
        if let Some(command) = &self.command {
            task.command = Some(command.clone());
        }
        if let Some(path) = &self.log_path {
            task.log_path = Some(path.clone());
        }
        if let Some(path) = &self.job_spec_path {
            task.job_spec_path = Some(path.clone());
        }
        if let Some(path) = &self.output_path {
            task.output_path = Some(path.clone());
        }
        if let Some(url) = &self.download_url {
            task.download_url = Some(url.clone());
        }
        if let Some(message) = &self.error_message {
            task.error_message = Some(message.clone());
        }
        if let Some(started) = self.started_at {
            task.started_at = Some(started);
        }
        if let (Some(ended), None) = (self.ended_at, task.ended_at) {
            task.ended_at = Some(ended);
        }
        if let Some(uptime) = self.uptime_secs {
            task.uptime_secs = Some(uptime);
        }
    }
}

/// Client-facing projection of a [`Task`] with uptime derived at read time.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub prompt: String,
    pub image_path: String,
    pub audio_path: String,
    pub pid: Option<i32>,
    pub log_path: Option<String>,
    pub output_path: Option<String>,
    pub download_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub uptime_secs: Option<f64>,
    pub progress: Option<Progress>,
    /// The most recent [`VIEW_LOG_ENTRIES`] lifecycle entries.
    pub recent_logs: Vec<LogEntry>,
}

impl TaskView {
    pub fn from_task(task: Task, now: Timestamp) -> Self {
        let uptime_secs = task.uptime_at(now);
        let skip = task.logs.len().saturating_sub(VIEW_LOG_ENTRIES);
        Self {
            uptime_secs,
            recent_logs: task.logs.into_iter().skip(skip).collect(),
            id: task.id,
            status: task.status,
            prompt: task.prompt,
            image_path: task.image_path,
            audio_path: task.audio_path,
            pid: task.pid,
            log_path: task.log_path,
            output_path: task.output_path,
            download_url: task.download_url,
            error_message: task.error_message,
            created_at: task.created_at,
            started_at: task.started_at,
            ended_at: task.ended_at,
            progress: task.progress,
        }
    }
}

/// Fractional seconds from `start` to `end`, clamped at zero.
pub fn seconds_between(start: Timestamp, end: Timestamp) -> f64 {
    let millis = (end - start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
