//! Collaborator-facing facade over the scheduler, monitors, cancellation,
//! and log access.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::stream::BoxStream;
use serde::Deserialize;
use talkvid_core::naming::{new_task_id, validate_task_id};
use talkvid_core::status::{TaskStatus, ACTIVE_STATUSES};
use talkvid_core::store::{StoreError, TaskStore};
use talkvid_core::task::{NewTask, Task, TaskView};
use talkvid_core::types::TaskId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::cancel::{self, CancelError, CancelOutcome};
use crate::config::SupervisorConfig;
use crate::context::SupervisorContext;
use crate::logs::{self, LogError, LogEvent, LogOutput, LogSnapshot, LogTail};
use crate::scheduler::Scheduler;

/// Request to generate one video.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitTask {
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,
    #[validate(length(min = 1, message = "image_path must not be empty"))]
    pub image_path: String,
    #[validate(length(min = 1, message = "audio_path must not be empty"))]
    pub audio_path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {0} is active; cancel it first")]
    Active(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Supervisor {
    ctx: Arc<SupervisorContext>,
    queue: UnboundedSender<TaskId>,
    inbox: Mutex<Option<UnboundedReceiver<TaskId>>>,
}

impl Supervisor {
    pub fn new(store: Arc<dyn TaskStore>, config: SupervisorConfig) -> Self {
        let (queue, inbox) = mpsc::unbounded_channel();
        Self {
            ctx: Arc::new(SupervisorContext::new(store, config)),
            queue,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.ctx.config
    }

    /// Start the scheduler loop. Only the first call starts anything.
    pub fn start(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let scheduler = Scheduler::new(self.ctx.clone(), inbox);
        Some(tokio::spawn(scheduler.run(cancel)))
    }

    /// Persist a new `pending` task and enqueue it.
    pub async fn submit(&self, input: SubmitTask) -> Result<TaskId, SubmitError> {
        input
            .validate()
            .map_err(|e| SubmitError::Validation(e.to_string()))?;

        let id = new_task_id();
        let new = NewTask {
            prompt: input.prompt,
            image_path: input.image_path,
            audio_path: input.audio_path,
        };
        self.ctx.store.create_task(id.clone(), new).await?;
        self.ctx.record(&id, "queued", 0, "INFO", "Task queued").await;

        if self.queue.send(id.clone()).is_err() {
            // Picked up from the store by the next startup recovery.
            tracing::warn!(task_id = %id, "Scheduler queue closed");
        }
        tracing::info!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Current view of a task; `None` for unknown ids.
    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskView>, StoreError> {
        let task = self.ctx.store.get_task(task_id).await?;
        Ok(task.map(|t| TaskView::from_task(t, Utc::now())))
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        self.ctx.store.get_task(task_id).await
    }

    pub async fn cancel(&self, task_id: &str, force: bool) -> Result<CancelOutcome, CancelError> {
        cancel::cancel_task(&self.ctx, task_id, force).await
    }

    pub async fn log_snapshot(&self, task_id: &str) -> Result<LogSnapshot, LogError> {
        logs::snapshot(&self.ctx, task_id).await
    }

    pub async fn log_tail(&self, task_id: &str, lines: Option<usize>) -> Result<LogTail, LogError> {
        let lines = lines.unwrap_or(self.ctx.config.log_tail_lines);
        logs::tail(&self.ctx, task_id, lines).await
    }

    pub async fn follow_logs(
        &self,
        task_id: &str,
    ) -> Result<BoxStream<'static, LogEvent>, LogError> {
        logs::follow_stream(self.ctx.clone(), task_id).await
    }

    /// Log access in snapshot or follow mode.
    pub async fn stream_logs(&self, task_id: &str, follow: bool) -> Result<LogOutput, LogError> {
        logs::stream(self.ctx.clone(), task_id, follow).await
    }

    pub async fn list_active(&self) -> Result<Vec<Task>, StoreError> {
        self.ctx.store.list_tasks_by_status(&ACTIVE_STATUSES).await
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        self.ctx.store.list_tasks(status, limit).await
    }

    /// Delete a non-active task. Its files are left on disk.
    pub async fn delete(&self, task_id: &str) -> Result<(), DeleteError> {
        let task = self
            .ctx
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| DeleteError::NotFound(task_id.to_string()))?;
        if task.status.is_active() {
            return Err(DeleteError::Active(task_id.to_string()));
        }
        if !self.ctx.store.delete_task(task_id).await? {
            return Err(DeleteError::NotFound(task_id.to_string()));
        }
        tracing::info!(task_id, "Task deleted");
        Ok(())
    }

    /// Output artifact of a successful task, if it exists on disk.
    pub async fn output_file(&self, task_id: &str) -> Result<Option<PathBuf>, StoreError> {
        if validate_task_id(task_id).is_err() {
            return Ok(None);
        }
        let Some(task) = self.ctx.store.get_task(task_id).await? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Success {
            return Ok(None);
        }
        let path = self.ctx.output_path(&task);
        Ok(tokio::fs::try_exists(&path)
            .await
            .unwrap_or(false)
            .then_some(path))
    }
}
