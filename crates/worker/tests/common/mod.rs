//! Shared helpers for supervisor integration tests.
//!
//! Fixture generators are `/bin/sh` scripts. Every fixture receives the
//! real generator argument vector and has `$out` bound to the
//! `--save_file` value.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use talkvid_core::naming::TaskPaths;
use talkvid_core::status::TaskStatus;
use talkvid_core::supervision::launcher::GenerationOptions;
use talkvid_core::task::TaskView;
use talkvid_db::MemoryTaskStore;
use talkvid_worker::{SubmitTask, Supervisor, SupervisorConfig};
use tokio_util::sync::CancellationToken;

pub const SUCCESS_LINE: &str = "Generation finished.Saving generated video to";

/// Write a fixture generator script and return its path.
pub fn fixture(dir: &Path, body: &str) -> String {
    let path = dir.join("fixture_generator.sh");
    let script = format!(
        "out=\"\"\n\
         while [ $# -gt 0 ]; do\n\
         \x20 if [ \"$1\" = \"--save_file\" ]; then out=\"$2\"; fi\n\
         \x20 shift\n\
         done\n\
         {body}\n"
    );
    std::fs::write(&path, script).expect("write fixture");
    path.display().to_string()
}

/// Fast-ticking config running `script` through `/bin/sh`.
pub fn config(dir: &Path, script: &str) -> SupervisorConfig {
    SupervisorConfig {
        max_concurrent: 1,
        tick_interval: Duration::from_millis(50),
        monitor_interval: Duration::from_millis(50),
        cancel_grace: Duration::from_millis(300),
        cancel_kill_wait: Duration::from_secs(2),
        paths: TaskPaths::under(dir),
        generation: GenerationOptions {
            python: "/bin/sh".into(),
            script: script.into(),
            ..GenerationOptions::default()
        },
        follow_poll: Duration::from_millis(50),
        follow_idle: Duration::from_secs(10),
        ..SupervisorConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryTaskStore>,
    pub supervisor: Supervisor,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(config: SupervisorConfig) -> Self {
        let store = Arc::new(MemoryTaskStore::new());
        let supervisor = Supervisor::new(store.clone(), config);
        Self {
            store,
            supervisor,
            cancel: CancellationToken::new(),
        }
    }

    pub fn start(&self) {
        self.supervisor
            .start(self.cancel.clone())
            .expect("scheduler starts once");
    }

    pub async fn submit(&self, prompt: &str) -> String {
        self.supervisor
            .submit(SubmitTask {
                prompt: prompt.into(),
                image_path: "/inputs/face.png".into(),
                audio_path: "/inputs/voice.wav".into(),
            })
            .await
            .expect("submit")
    }

    pub async fn status(&self, id: &str) -> TaskView {
        self.supervisor
            .get_status(id)
            .await
            .expect("store")
            .expect("task exists")
    }

    /// Poll until `pred` holds for the task or `timeout` expires.
    pub async fn wait_for<F>(&self, id: &str, timeout: Duration, pred: F) -> TaskView
    where
        F: Fn(&TaskView) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let view = self.status(id).await;
            if pred(&view) {
                return view;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting on {id}; last status {}", view.status);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub async fn wait_terminal(&self, id: &str) -> TaskView {
        self.wait_for(id, Duration::from_secs(15), |v| v.status.is_terminal())
            .await
    }

    pub async fn wait_status(&self, id: &str, status: TaskStatus) -> TaskView {
        self.wait_for(id, Duration::from_secs(15), |v| v.status == status)
            .await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
