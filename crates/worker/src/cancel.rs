//! Cancellation: SIGTERM, bounded wait, SIGKILL escalation.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use talkvid_core::status::{TaskStatus, ACTIVE_STATUSES};
use talkvid_core::store::StoreError;
use talkvid_core::supervision::process::{self, Delivery, Signal};
use talkvid_core::task::TaskPatch;

use crate::context::SupervisorContext;
use crate::registry::Liveness;

pub const CANCELLED_MESSAGE: &str = "cancelled by request";

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("Task not found: {0}")]
    NotFound(String),

    /// No persisted pid, or the task already reached a terminal state.
    #[error("Task {id} is not running (status: {status})")]
    NotRunning { id: String, status: TaskStatus },

    #[error("Failed to signal pid {pid}: {source}")]
    SignalFailed {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a completed cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub pid: i32,
    /// `true` if SIGKILL was sent.
    pub forced: bool,
    /// `true` if this call wrote the `cancelled` status; `false` when the
    /// task reached a terminal state first.
    pub recorded: bool,
}

/// Removes the in-flight marker on every exit path.
struct CancelGuard<'a> {
    ctx: &'a SupervisorContext,
    task_id: &'a str,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.ctx.end_cancel(self.task_id);
    }
}

async fn wait_gone(
    ctx: &SupervisorContext,
    task_id: &str,
    pid: i32,
    timeout: std::time::Duration,
) -> bool {
    process::wait_for_exit(
        || {
            let alive = ctx.registry.liveness(task_id, pid) == Liveness::Alive;
            async move { alive }
        },
        timeout,
    )
    .await
}

fn deliver(pid: i32, signal: Signal) -> Result<Delivery, CancelError> {
    process::send_signal(pid, signal).map_err(|source| CancelError::SignalFailed { pid, source })
}

/// Stop the job behind `task_id` and record `cancelled`.
pub async fn cancel_task(
    ctx: &Arc<SupervisorContext>,
    task_id: &str,
    force: bool,
) -> Result<CancelOutcome, CancelError> {
    let task = ctx
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| CancelError::NotFound(task_id.to_string()))?;

    let pid = match task.pid {
        Some(pid) if !task.status.is_terminal() => pid,
        _ => {
            return Err(CancelError::NotRunning {
                id: task.id,
                status: task.status,
            })
        }
    };

    let _guard = if ctx.begin_cancel(task_id) {
        Some(CancelGuard { ctx, task_id })
    } else {
        tracing::info!(task_id, pid, "Cancellation already in progress");
        None
    };

    let mut forced = force;
    if !force {
        tracing::info!(task_id, pid, "Sending SIGTERM");
        if deliver(pid, Signal::Terminate)? == Delivery::Delivered
            && !wait_gone(ctx, task_id, pid, ctx.config.cancel_grace).await
        {
            forced = true;
        }
    }
    if forced {
        tracing::warn!(task_id, pid, "Sending SIGKILL");
        deliver(pid, Signal::Kill)?;
        if !wait_gone(ctx, task_id, pid, ctx.config.cancel_kill_wait).await {
            tracing::error!(task_id, pid, "Process still alive after SIGKILL");
        }
    }
    ctx.registry.release(task_id);

    let patch = TaskPatch::terminal(
        TaskStatus::Cancelled,
        Utc::now(),
        task.started_at,
        Some(CANCELLED_MESSAGE.to_string()),
    );
    let recorded = ctx
        .store
        .update_task_fields_if(task_id, &ACTIVE_STATUSES, patch)
        .await?;
    if recorded {
        tracing::info!(task_id, pid, forced, "Task cancelled");
        ctx.record(task_id, "cancelled", 100, "WARNING", CANCELLED_MESSAGE)
            .await;
    } else {
        tracing::info!(task_id, pid, "Task finished before cancellation was recorded");
    }

    Ok(CancelOutcome {
        pid,
        forced,
        recorded,
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use talkvid_core::naming::TaskPaths;
    use talkvid_core::store::TaskStore;
    use talkvid_core::task::{NewTask, Task};

    use super::*;
    use crate::config::SupervisorConfig;
    use crate::test_support::ScriptedStore;

    fn context(dir: &std::path::Path) -> (Arc<ScriptedStore>, Arc<SupervisorContext>) {
        let store = Arc::new(ScriptedStore::new());
        let config = SupervisorConfig {
            paths: TaskPaths::under(dir),
            cancel_grace: Duration::from_secs(2),
            cancel_kill_wait: Duration::from_secs(1),
            ..SupervisorConfig::default()
        };
        let ctx = Arc::new(SupervisorContext::new(store.clone(), config));
        (store, ctx)
    }

    /// Spawn `sleep 30` in its own process group and register it as `id`.
    async fn running_sleeper(store: &ScriptedStore, ctx: &SupervisorContext, id: &str) -> i32 {
        let child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .expect("spawn sleep");
        let pid = child.id() as i32;
        ctx.registry.insert(id.into(), child);

        let input = NewTask {
            prompt: "p".into(),
            image_path: "i".into(),
            audio_path: "a".into(),
        };
        let mut task = Task::new(id.into(), &input, Utc::now());
        task.status = TaskStatus::Running;
        task.pid = Some(pid);
        task.started_at = Some(Utc::now());
        store.inner.insert(task).await;
        pid
    }

    #[tokio::test]
    async fn cancel_stops_job_and_records_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ctx) = context(dir.path());
        let pid = running_sleeper(&store, &ctx, "t1").await;

        let outcome = cancel_task(&ctx, "t1", false).await.unwrap();
        assert_eq!(outcome.pid, pid);
        assert!(!outcome.forced);
        assert!(outcome.recorded);

        let stored = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert_eq!(stored.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(!ctx.is_cancelling("t1"));
    }

    #[tokio::test]
    async fn terminal_state_reached_during_cancel_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ctx) = context(dir.path());
        running_sleeper(&store, &ctx, "t1").await;
        // The monitor records success between the read and the cancel write.
        store.overtake(TaskStatus::Cancelled, TaskStatus::Success);

        let outcome = cancel_task(&ctx, "t1", false).await.unwrap();
        assert!(!outcome.recorded);

        let stored = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn task_without_pid_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ctx) = context(dir.path());
        let input = NewTask {
            prompt: "p".into(),
            image_path: "i".into(),
            audio_path: "a".into(),
        };
        store.create_task("t1".into(), input).await.unwrap();

        let err = cancel_task(&ctx, "t1", true).await.unwrap_err();
        assert_matches!(err, CancelError::NotRunning { status: TaskStatus::Pending, .. });
        assert_matches!(
            cancel_task(&ctx, "missing", false).await,
            Err(CancelError::NotFound(_))
        );
    }
}
