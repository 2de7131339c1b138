//! In-memory cache of child handles owned by this supervisor.
//!
//! Owning the `Child` lets monitors read real exit codes and reap zombies.
//! The persisted pid stays authoritative: after a restart the registry is
//! empty and liveness falls back to [`process::is_alive`].

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::Mutex;

use talkvid_core::supervision::process;
use talkvid_core::types::TaskId;

/// What the supervisor knows about a task's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Exited; the code is `None` when the child is not owned here.
    Exited(Option<i32>),
}

enum Entry {
    Running(Child),
    Exited(Option<i32>),
}

#[derive(Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<TaskId, Entry>>,
}

/// Exit code, with signal deaths reported shell-style as `128 + signo`.
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task_id: TaskId, child: Child) {
        self.lock().insert(task_id, Entry::Running(child));
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Check liveness, preferring the owned child over a bare pid probe.
    ///
    /// A reaped exit code is kept until [`release`](Self::release).
    pub fn liveness(&self, task_id: &str, pid: i32) -> Liveness {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(task_id) else {
            return if process::is_alive(pid) {
                Liveness::Alive
            } else {
                Liveness::Exited(None)
            };
        };
        match entry {
            Entry::Exited(code) => Liveness::Exited(*code),
            Entry::Running(child) => match child.try_wait() {
                Ok(None) => Liveness::Alive,
                Ok(Some(status)) => {
                    let code = exit_code(status);
                    *entry = Entry::Exited(code);
                    Liveness::Exited(code)
                }
                Err(e) => {
                    tracing::warn!(task_id, pid, error = %e, "try_wait failed, probing pid");
                    if process::is_alive(pid) {
                        Liveness::Alive
                    } else {
                        Liveness::Exited(None)
                    }
                }
            },
        }
    }

    /// Drop the entry for `task_id`.
    ///
    /// A still-running child is reaped on the blocking pool so it never
    /// lingers as a zombie. Must be called from within a Tokio runtime.
    pub fn release(&self, task_id: &str) {
        let entry = self.lock().remove(task_id);
        if let Some(Entry::Running(mut child)) = entry {
            let task_id = task_id.to_string();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = child.wait() {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to reap child");
                }
            });
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Entry>> {
        // A panic while holding the lock cannot leave the map inconsistent.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
