//! Historical and live access to per-task generator logs.
//!
//! Snapshots read the whole file. Follow streams replay the file from the
//! start and keep polling until the task is terminal or the log has been
//! idle for the configured cutoff, then emit [`LogEvent::End`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use talkvid_core::naming::validate_task_id;
use talkvid_core::store::StoreError;
use talkvid_core::supervision::classifier;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

use crate::context::SupervisorContext;

/// Snapshots above this size are served but logged.
const LARGE_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Upper bound for `tail` requests.
pub const MAX_TAIL_LINES: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Invalid task id: {0}")]
    InvalidId(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Log file not found: {0}")]
    LogNotFound(String),

    #[error("Failed to read log: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSnapshot {
    pub task_id: String,
    pub logs: String,
    pub size: u64,
    pub lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogTail {
    pub task_id: String,
    pub lines: Vec<String>,
    pub count: usize,
}

/// One item of a follow stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(String),
    /// The stream is over; no further items follow.
    End,
}

/// Result of [`stream`]: the whole file, or a live stream.
pub enum LogOutput {
    Snapshot(LogSnapshot),
    Follow(BoxStream<'static, LogEvent>),
}

/// Validate the id and resolve the task's log file.
async fn resolve(ctx: &SupervisorContext, task_id: &str) -> Result<PathBuf, LogError> {
    validate_task_id(task_id).map_err(|_| LogError::InvalidId(task_id.to_string()))?;
    let task = ctx
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| LogError::TaskNotFound(task_id.to_string()))?;
    Ok(ctx.log_path(&task))
}

/// Read the full log.
pub async fn snapshot(ctx: &SupervisorContext, task_id: &str) -> Result<LogSnapshot, LogError> {
    let path = resolve(ctx, task_id).await?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LogError::LogNotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let size = bytes.len() as u64;
    if size > LARGE_LOG_BYTES {
        tracing::warn!(task_id, size, "Serving large log snapshot");
    }
    let logs = String::from_utf8_lossy(&bytes).into_owned();
    let lines = logs.lines().count();
    Ok(LogSnapshot {
        task_id: task_id.to_string(),
        logs,
        size,
        lines,
    })
}

/// Last `lines` lines of the log, clamped to `1..=MAX_TAIL_LINES`.
pub async fn tail(
    ctx: &SupervisorContext,
    task_id: &str,
    lines: usize,
) -> Result<LogTail, LogError> {
    let path = resolve(ctx, task_id).await?;
    let lines = lines.clamp(1, MAX_TAIL_LINES);
    let tail = classifier::read_tail(&path, lines)
        .await?
        .ok_or_else(|| LogError::LogNotFound(path.display().to_string()))?;
    Ok(LogTail {
        task_id: task_id.to_string(),
        count: tail.len(),
        lines: tail,
    })
}

struct FollowState {
    ctx: Arc<SupervisorContext>,
    task_id: String,
    path: PathBuf,
    reader: Option<BufReader<File>>,
    partial: Vec<u8>,
    ready: VecDeque<String>,
    last_activity: Instant,
    poll: Duration,
    idle: Duration,
    end_pending: bool,
    finished: bool,
}

impl FollowState {
    /// Read every complete line currently available into `ready`.
    async fn drain(&mut self) -> std::io::Result<()> {
        if self.reader.is_none() {
            match File::open(&self.path).await {
                Ok(file) => self.reader = Some(BufReader::new(file)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };
        loop {
            let n = reader.read_until(b'\n', &mut self.partial).await?;
            if n == 0 || !self.partial.ends_with(b"\n") {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&self.partial)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            self.partial.clear();
            self.ready.push_back(line);
            self.last_activity = Instant::now();
        }
    }

    /// `true` once the task is terminal or gone.
    async fn task_finished(&self) -> bool {
        match self.ctx.store.get_task(&self.task_id).await {
            Ok(Some(task)) => task.status.is_terminal(),
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    error = %e,
                    "Status check failed while following log",
                );
                false
            }
        }
    }

    fn pop_buffered(&mut self) -> Option<LogEvent> {
        if let Some(line) = self.ready.pop_front() {
            return Some(LogEvent::Line(line));
        }
        if self.end_pending {
            self.end_pending = false;
            self.finished = true;
            return Some(LogEvent::End);
        }
        None
    }

    async fn next_event(&mut self) -> Option<LogEvent> {
        if let Some(event) = self.pop_buffered() {
            return Some(event);
        }
        if self.finished {
            return None;
        }
        loop {
            if let Err(e) = self.drain().await {
                tracing::warn!(
                    task_id = %self.task_id,
                    error = %e,
                    "Log read failed, ending follow",
                );
                self.end_pending = true;
                return self.pop_buffered();
            }
            if let Some(event) = self.pop_buffered() {
                return Some(event);
            }

            if self.task_finished().await {
                // The job has exited, so everything it wrote is on disk.
                if let Err(e) = self.drain().await {
                    tracing::warn!(task_id = %self.task_id, error = %e, "Final log read failed");
                }
                if !self.partial.is_empty() {
                    let rest = std::mem::take(&mut self.partial);
                    let rest = String::from_utf8_lossy(&rest);
                    self.ready.push_back(rest.trim_end_matches('\r').to_string());
                }
                self.end_pending = true;
                return self.pop_buffered();
            }
            if self.last_activity.elapsed() >= self.idle {
                tracing::debug!(task_id = %self.task_id, "Log follow idle timeout");
                self.end_pending = true;
                return self.pop_buffered();
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

/// Live stream of log lines ending with [`LogEvent::End`].
///
/// Dropping the stream closes the file handle.
pub async fn follow_stream(
    ctx: Arc<SupervisorContext>,
    task_id: &str,
) -> Result<BoxStream<'static, LogEvent>, LogError> {
    let path = resolve(&ctx, task_id).await?;
    let poll = ctx.config.follow_poll;
    let idle = ctx.config.follow_idle;
    let state = FollowState {
        ctx,
        task_id: task_id.to_string(),
        path,
        reader: None,
        partial: Vec::new(),
        ready: VecDeque::new(),
        last_activity: Instant::now(),
        poll,
        idle,
        end_pending: false,
        finished: false,
    };
    Ok(stream::unfold(state, |mut state| async move {
        let event = state.next_event().await?;
        Some((event, state))
    })
    .boxed())
}

/// Snapshot or follow, depending on `follow`.
pub async fn stream(
    ctx: Arc<SupervisorContext>,
    task_id: &str,
    follow: bool,
) -> Result<LogOutput, LogError> {
    if follow {
        follow_stream(ctx, task_id).await.map(LogOutput::Follow)
    } else {
        snapshot(&ctx, task_id).await.map(LogOutput::Snapshot)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use talkvid_core::naming::TaskPaths;
    use talkvid_core::status::TaskStatus;
    use talkvid_core::store::TaskStore;
    use talkvid_core::task::{NewTask, Task, TaskPatch};
    use talkvid_db::MemoryTaskStore;

    use super::*;
    use crate::config::SupervisorConfig;

    fn context(dir: &std::path::Path) -> (Arc<MemoryTaskStore>, Arc<SupervisorContext>) {
        let store = Arc::new(MemoryTaskStore::new());
        let config = SupervisorConfig {
            paths: TaskPaths::under(dir),
            follow_poll: Duration::from_millis(20),
            follow_idle: Duration::from_millis(200),
            ..SupervisorConfig::default()
        };
        let ctx = Arc::new(SupervisorContext::new(store.clone(), config));
        (store, ctx)
    }

    async fn running_task(store: &MemoryTaskStore, ctx: &SupervisorContext, id: &str, log: &str) {
        let input = NewTask {
            prompt: "p".into(),
            image_path: "i".into(),
            audio_path: "a".into(),
        };
        let mut task = Task::new(id.into(), &input, Utc::now());
        task.status = TaskStatus::Running;
        task.pid = Some(1);
        store.insert(task).await;

        let path = ctx.config.paths.log_path(id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, log).unwrap();
    }

    #[tokio::test]
    async fn follow_ends_after_idle_cutoff_while_task_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ctx) = context(dir.path());
        running_task(&store, &ctx, "t1", "loading model\nstep 1/40\n").await;

        let started = Instant::now();
        let events: Vec<LogEvent> = follow_stream(ctx, "t1").await.unwrap().collect().await;

        assert_eq!(
            events,
            vec![
                LogEvent::Line("loading model".into()),
                LogEvent::Line("step 1/40".into()),
                LogEvent::End,
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(200));
        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn follow_flushes_unterminated_line_once_task_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ctx) = context(dir.path());
        running_task(&store, &ctx, "t1", "step 40/40\nsaved").await;
        store
            .update_task_fields(
                "t1",
                TaskPatch::terminal(TaskStatus::Success, Utc::now(), None, None),
            )
            .await
            .unwrap();

        let events: Vec<LogEvent> = follow_stream(ctx, "t1").await.unwrap().collect().await;
        assert_eq!(
            events,
            vec![
                LogEvent::Line("step 40/40".into()),
                LogEvent::Line("saved".into()),
                LogEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn snapshot_and_tail_read_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ctx) = context(dir.path());
        running_task(&store, &ctx, "t1", "a\nb\nc\n").await;

        let snap = snapshot(&ctx, "t1").await.unwrap();
        assert_eq!(snap.lines, 3);
        assert_eq!(snap.size, 6);

        let tail = tail(&ctx, "t1", 2).await.unwrap();
        assert_eq!(tail.lines, vec!["b".to_string(), "c".to_string()]);

        assert!(matches!(
            snapshot(&ctx, "../etc").await,
            Err(LogError::InvalidId(_))
        ));
        assert!(matches!(
            snapshot(&ctx, "missing").await,
            Err(LogError::TaskNotFound(_))
        ));
    }
}
