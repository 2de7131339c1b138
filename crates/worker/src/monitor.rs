//! Per-task liveness monitor.
//!
//! One monitor runs for each `running` task this process knows about. It
//! polls the pid, persists uptime while the job is alive, and writes the
//! terminal status once the process exits. Monitors talk to the scheduler
//! only through the store.

use std::sync::Arc;

use chrono::Utc;
use talkvid_core::status::{TaskStatus, ACTIVE_STATUSES};
use talkvid_core::supervision::classifier::{self, Outcome, Verdict};
use talkvid_core::task::{seconds_between, Task, TaskPatch};
use talkvid_core::types::TaskId;

use crate::context::SupervisorContext;
use crate::registry::Liveness;

/// Error message used when a classified success left no output file.
pub const ARTIFACT_MISSING: &str = "output artifact missing";

/// Spawn a monitor for `task_id` unless one is already running here.
///
/// Returns `true` if a new monitor was started.
pub fn spawn_monitor(ctx: Arc<SupervisorContext>, task_id: TaskId, pid: i32) -> bool {
    if !ctx.claim_monitor(&task_id) {
        return false;
    }
    tokio::spawn(async move {
        let _guard = MonitorGuard {
            ctx: ctx.clone(),
            task_id: task_id.clone(),
        };
        run(&ctx, &task_id, pid).await;
    });
    true
}

/// Clears the monitored flag however the monitor task ends.
struct MonitorGuard {
    ctx: Arc<SupervisorContext>,
    task_id: TaskId,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.ctx.release_monitor(&self.task_id);
    }
}

enum Step {
    Continue,
    Stop,
}

async fn run(ctx: &SupervisorContext, task_id: &str, pid: i32) {
    tracing::info!(task_id, pid, "Liveness monitor started");
    loop {
        tokio::time::sleep(ctx.config.monitor_interval).await;
        match poll_once(ctx, task_id, pid).await {
            Ok(Step::Continue) => {}
            Ok(Step::Stop) => break,
            Err(e) => {
                tracing::error!(task_id, pid, error = %e, "Monitor poll failed");
            }
        }
    }
    tracing::debug!(task_id, pid, "Liveness monitor stopped");
}

async fn poll_once(
    ctx: &SupervisorContext,
    task_id: &str,
    pid: i32,
) -> Result<Step, talkvid_core::store::StoreError> {
    let Some(task) = ctx.store.get_task(task_id).await? else {
        tracing::info!(task_id, "Task deleted, stopping monitor");
        ctx.registry.release(task_id);
        return Ok(Step::Stop);
    };
    if task.status.is_terminal() {
        ctx.registry.release(task_id);
        return Ok(Step::Stop);
    }

    match ctx.registry.liveness(task_id, pid) {
        Liveness::Alive => {
            if let Some(started) = task.started_at {
                let patch = TaskPatch {
                    uptime_secs: Some(seconds_between(started, Utc::now())),
                    ..TaskPatch::default()
                };
                ctx.store
                    .update_task_fields_if(task_id, &ACTIVE_STATUSES, patch)
                    .await?;
            }
            Ok(Step::Continue)
        }
        Liveness::Exited(_) if ctx.is_cancelling(task_id) => {
            // The canceller owns the terminal write.
            Ok(Step::Stop)
        }
        Liveness::Exited(code) => {
            finalize(ctx, &task, code).await?;
            ctx.registry.release(task_id);
            Ok(Step::Stop)
        }
    }
}

/// Classify the finished job and persist its terminal state.
pub async fn finalize(
    ctx: &SupervisorContext,
    task: &Task,
    exit_code: Option<i32>,
) -> Result<bool, talkvid_core::store::StoreError> {
    let log_path = ctx.log_path(task);
    let tail = match classifier::read_tail(&log_path, ctx.config.log_tail_lines).await {
        Ok(tail) => tail,
        Err(e) => {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to read log tail");
            None
        }
    };
    let mut verdict = classifier::classify(exit_code, tail.as_deref(), &ctx.config.markers);

    let output_path = ctx.output_path(task);
    if verdict.is_success() && !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
        verdict = Verdict {
            outcome: Outcome::Failed,
            error_message: Some(ARTIFACT_MISSING.to_string()),
            basis: verdict.basis,
        };
    }

    let ended_at = Utc::now();
    let (status, mut patch) = match verdict.outcome {
        Outcome::Success => {
            let mut patch =
                TaskPatch::terminal(TaskStatus::Success, ended_at, task.started_at, None);
            patch.output_path = Some(output_path.display().to_string());
            patch.download_url = ctx.config.download_url(&task.id);
            (TaskStatus::Success, patch)
        }
        Outcome::Failed => (
            TaskStatus::Failed,
            TaskPatch::terminal(
                TaskStatus::Failed,
                ended_at,
                task.started_at,
                verdict.error_message.clone(),
            ),
        ),
    };
    if patch.uptime_secs.is_none() {
        patch.uptime_secs = Some(0.0);
    }

    let applied = ctx
        .store
        .update_task_fields_if(&task.id, &ACTIVE_STATUSES, patch)
        .await?;
    if !applied {
        tracing::debug!(task_id = %task.id, "Task already terminal, verdict discarded");
        return Ok(false);
    }

    match status {
        TaskStatus::Success => {
            tracing::info!(
                task_id = %task.id,
                exit_code = ?exit_code,
                basis = ?verdict.basis,
                "Task succeeded",
            );
            ctx.record(&task.id, "finished", 100, "INFO", "Video generated").await;
        }
        _ => {
            let message = verdict.error_message.as_deref().unwrap_or("generation failed");
            tracing::warn!(
                task_id = %task.id,
                exit_code = ?exit_code,
                basis = ?verdict.basis,
                error = %message,
                "Task failed",
            );
            ctx.record(&task.id, "finished", 100, "ERROR", message).await;
        }
    }
    Ok(true)
}
