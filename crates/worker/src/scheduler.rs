//! Single-loop scheduler: reconcile active tasks, dequeue, launch.
//!
//! Ticks never overlap, so every `pending -> processing` claim made here is
//! serialized. Claims and launch results still go through conditional
//! writes so that a second writer (another supervisor, a manual edit)
//! cannot be overwritten.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use talkvid_core::status::{TaskStatus, ACTIVE_STATUSES};
use talkvid_core::store::StoreError;
use talkvid_core::supervision::launcher::{self, LaunchRequest};
use talkvid_core::supervision::process::{self, Signal};
use talkvid_core::task::{Task, TaskPatch};
use talkvid_core::types::TaskId;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::admission::Admission;
use crate::context::SupervisorContext;
use crate::monitor;

/// Error recorded for tasks claimed by a supervisor that died before launch.
pub const RESTARTED_BEFORE_LAUNCH: &str = "supervisor restarted before launch";

/// Error recorded for claims whose launch result never reached the store.
pub const LAUNCH_NOT_RECORDED: &str = "launch result could not be recorded";

pub struct Scheduler {
    ctx: Arc<SupervisorContext>,
    admission: Admission,
    inbox: UnboundedReceiver<TaskId>,
    backlog: VecDeque<TaskId>,
}

impl Scheduler {
    pub fn new(ctx: Arc<SupervisorContext>, inbox: UnboundedReceiver<TaskId>) -> Self {
        let admission = Admission::new(ctx.store.clone(), ctx.config.max_concurrent);
        Self {
            ctx,
            admission,
            inbox,
            backlog: VecDeque::new(),
        }
    }

    /// Recover persisted state, then tick until `cancel` fires.
    ///
    /// Running monitors are left alone on shutdown.
    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.recover().await {
            tracing::error!(error = %e, "Startup recovery failed");
        }

        let mut ticker = tokio::time::interval(self.ctx.config.tick_interval);
        tracing::info!(
            tick_ms = self.ctx.config.tick_interval.as_millis() as u64,
            max_concurrent = self.admission.limit(),
            "Scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Rebuild the queue and fail orphaned claims left by a previous run.
    ///
    /// `running` tasks are picked up by the first reconcile.
    pub async fn recover(&mut self) -> Result<(), StoreError> {
        let pending = self
            .ctx
            .store
            .list_tasks_by_status(&[TaskStatus::Pending])
            .await?;
        let requeued = pending.len();
        self.backlog.extend(pending.into_iter().map(|t| t.id));

        let processing = self
            .ctx
            .store
            .list_tasks_by_status(&[TaskStatus::Processing])
            .await?;
        let mut orphaned = 0usize;
        for task in processing.into_iter().filter(|t| t.pid.is_none()) {
            let patch = TaskPatch::terminal(
                TaskStatus::Failed,
                Utc::now(),
                task.started_at,
                Some(RESTARTED_BEFORE_LAUNCH.to_string()),
            );
            if self
                .ctx
                .store
                .update_task_fields_if(&task.id, &[TaskStatus::Processing], patch)
                .await?
            {
                orphaned += 1;
                tracing::warn!(task_id = %task.id, "Failed orphaned claim");
                self.ctx
                    .record(&task.id, "finished", 100, "ERROR", RESTARTED_BEFORE_LAUNCH)
                    .await;
            }
        }

        tracing::info!(requeued, orphaned, "Startup recovery complete");
        Ok(())
    }

    /// One scheduler cycle.
    pub async fn tick(&mut self) -> Result<(), StoreError> {
        while let Ok(id) = self.inbox.try_recv() {
            self.backlog.push_back(id);
        }

        self.reconcile().await?;

        if !self.admission.can_dispatch().await? {
            return Ok(());
        }
        if let Some(task) = self.claim_next().await? {
            self.launch(task).await?;
        }
        Ok(())
    }

    /// Make sure every active task with a pid has a monitor here, and fail
    /// claims left without one.
    ///
    /// Claim and launch finish within a single tick, so a `processing` task
    /// without a pid seen here is a claim whose launch outcome was lost.
    async fn reconcile(&self) -> Result<(), StoreError> {
        let active = self.ctx.store.list_tasks_by_status(&ACTIVE_STATUSES).await?;
        for task in active {
            let Some(pid) = task.pid else {
                if task.status == TaskStatus::Processing {
                    self.fail_stranded_claim(&task).await?;
                }
                continue;
            };
            if self.ctx.is_monitored(&task.id) {
                continue;
            }
            tracing::info!(task_id = %task.id, pid, "Adopting unmonitored task");
            monitor::spawn_monitor(self.ctx.clone(), task.id, pid);
        }
        Ok(())
    }

    async fn fail_stranded_claim(&self, task: &Task) -> Result<(), StoreError> {
        let patch = TaskPatch::terminal(
            TaskStatus::Failed,
            Utc::now(),
            task.started_at,
            Some(LAUNCH_NOT_RECORDED.to_string()),
        );
        if self
            .ctx
            .store
            .update_task_fields_if(&task.id, &[TaskStatus::Processing], patch)
            .await?
        {
            tracing::warn!(task_id = %task.id, "Failed claim with no recorded launch");
            self.ctx
                .record(&task.id, "finished", 100, "ERROR", LAUNCH_NOT_RECORDED)
                .await;
        }
        Ok(())
    }

    /// Pop queued ids until one is successfully claimed.
    async fn claim_next(&mut self) -> Result<Option<Task>, StoreError> {
        while let Some(id) = self.backlog.pop_front() {
            let Some(task) = self.ctx.store.get_task(&id).await? else {
                tracing::debug!(task_id = %id, "Queued task no longer exists");
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }

            let started_at = Utc::now();
            let claim = TaskPatch {
                status: Some(TaskStatus::Processing),
                started_at: Some(started_at),
                ..TaskPatch::default()
            };
            if !self
                .ctx
                .store
                .update_task_fields_if(&id, &[TaskStatus::Pending], claim)
                .await?
            {
                tracing::debug!(task_id = %id, "Task claimed elsewhere");
                continue;
            }

            tracing::info!(task_id = %id, "Task claimed");
            self.ctx
                .record(&id, "launching", 5, "INFO", "Launching generator")
                .await;
            return Ok(Some(Task {
                status: TaskStatus::Processing,
                started_at: Some(started_at),
                ..task
            }));
        }
        Ok(None)
    }

    async fn launch(&self, task: Task) -> Result<(), StoreError> {
        let request = LaunchRequest {
            task_id: task.id.clone(),
            prompt: task.prompt.clone(),
            image_path: task.image_path.clone(),
            audio_path: task.audio_path.clone(),
        };
        let result = launcher::launch(
            request,
            self.ctx.config.generation.clone(),
            self.ctx.config.paths.clone(),
        )
        .await;

        let launched = match result {
            Ok(launched) => launched,
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Launch failed");
                let message = e.to_string();
                let patch = TaskPatch::terminal(
                    TaskStatus::Failed,
                    Utc::now(),
                    task.started_at,
                    Some(message.clone()),
                );
                self.ctx
                    .store
                    .update_task_fields_if(&task.id, &[TaskStatus::Processing], patch)
                    .await?;
                self.ctx.record(&task.id, "finished", 100, "ERROR", &message).await;
                return Ok(());
            }
        };

        let handle = launched.handle;
        self.ctx.registry.insert(task.id.clone(), launched.child);

        let patch = TaskPatch {
            status: Some(TaskStatus::Running),
            pid: Some(handle.pid),
            command: Some(handle.command.clone()),
            log_path: Some(handle.log_path.display().to_string()),
            job_spec_path: Some(handle.job_spec_path.display().to_string()),
            output_path: Some(handle.output_path.display().to_string()),
            ..TaskPatch::default()
        };
        let recorded = self
            .ctx
            .store
            .update_task_fields_if(&task.id, &[TaskStatus::Processing], patch)
            .await;

        match recorded {
            Ok(true) => {
                self.ctx
                    .record(&task.id, "generating", 10, "INFO", "Generator running")
                    .await;
                monitor::spawn_monitor(self.ctx.clone(), task.id, handle.pid);
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(
                    task_id = %task.id,
                    pid = handle.pid,
                    "Task left processing during launch, killing job",
                );
                self.abandon(&task.id, handle.pid);
                Ok(())
            }
            Err(e) => {
                // Without a persisted pid nobody could ever stop this job.
                // The next reconcile fails the claim.
                self.abandon(&task.id, handle.pid);
                Err(e)
            }
        }
    }

    fn abandon(&self, task_id: &str, pid: i32) {
        if let Err(e) = process::send_signal(pid, Signal::Kill) {
            tracing::error!(task_id, pid, error = %e, "Failed to kill abandoned job");
        }
        self.ctx.registry.release(task_id);
    }

    #[cfg(test)]
    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}
