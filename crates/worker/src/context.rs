//! State shared by the scheduler, monitors, cancellation, and log readers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use talkvid_core::store::TaskStore;
use talkvid_core::task::{LogEntry, Progress, Task};
use talkvid_core::types::TaskId;

use crate::config::SupervisorConfig;
use crate::registry::ProcessRegistry;

pub struct SupervisorContext {
    pub store: Arc<dyn TaskStore>,
    pub config: SupervisorConfig,
    pub registry: ProcessRegistry,
    /// Tasks with a live monitor in this process.
    monitored: Mutex<HashSet<TaskId>>,
    /// Tasks whose cancellation is in flight; monitors leave their terminal
    /// write to the canceller.
    cancelling: Mutex<HashSet<TaskId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SupervisorContext {
    pub fn new(store: Arc<dyn TaskStore>, config: SupervisorConfig) -> Self {
        Self {
            store,
            config,
            registry: ProcessRegistry::new(),
            monitored: Mutex::default(),
            cancelling: Mutex::default(),
        }
    }

    /// Mark `task_id` as monitored. Returns `false` if it already was.
    pub fn claim_monitor(&self, task_id: &str) -> bool {
        lock(&self.monitored).insert(task_id.to_string())
    }

    pub fn release_monitor(&self, task_id: &str) {
        lock(&self.monitored).remove(task_id);
    }

    pub fn is_monitored(&self, task_id: &str) -> bool {
        lock(&self.monitored).contains(task_id)
    }

    /// Returns `false` if a cancellation is already in flight.
    pub fn begin_cancel(&self, task_id: &str) -> bool {
        lock(&self.cancelling).insert(task_id.to_string())
    }

    pub fn end_cancel(&self, task_id: &str) {
        lock(&self.cancelling).remove(task_id);
    }

    pub fn is_cancelling(&self, task_id: &str) -> bool {
        lock(&self.cancelling).contains(task_id)
    }

    /// Persisted log path, falling back to the deterministic one.
    pub fn log_path(&self, task: &Task) -> PathBuf {
        task.log_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.paths.log_path(&task.id))
    }

    /// Persisted output path, falling back to the deterministic one.
    pub fn output_path(&self, task: &Task) -> PathBuf {
        task.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.paths.output_path(&task.id))
    }

    /// Record a lifecycle step: one log entry plus a progress snapshot.
    ///
    /// Store failures are logged and swallowed; lifecycle notes never block
    /// a transition.
    pub async fn record(&self, task_id: &str, stage: &str, percent: i16, level: &str, message: &str) {
        let now = Utc::now();
        let entry = LogEntry {
            timestamp: now,
            level: level.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = self.store.append_log(task_id, entry).await {
            tracing::warn!(task_id, error = %e, "Failed to append task log entry");
        }
        let progress = Progress {
            stage: stage.to_string(),
            percent,
            message: message.to_string(),
            updated_at: now,
        };
        if let Err(e) = self.store.update_progress(task_id, progress).await {
            tracing::warn!(task_id, error = %e, "Failed to update task progress");
        }
    }
}
