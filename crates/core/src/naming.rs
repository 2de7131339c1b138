//! Task id generation and the per-task file layout.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::CoreError;

/// Generate a new task id: `video_{YYYYmmdd_HHMMSS}_{8 hex}`.
///
/// Ids sort lexicographically in submission order at one-second resolution.
pub fn new_task_id() -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("video_{stamp}_{}", &suffix[..8])
}

/// Reject ids that could escape the working directories.
pub fn validate_task_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation("task id must not be empty".into()));
    }
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(CoreError::Validation(format!("invalid task id: {id}")));
    }
    Ok(())
}

/// Directories holding per-task logs, job specs, and output artifacts.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub log_dir: PathBuf,
    pub job_spec_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TaskPaths {
    pub fn new(
        log_dir: impl Into<PathBuf>,
        job_spec_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            log_dir: log_dir.into(),
            job_spec_dir: job_spec_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// All three directories under one root, as used by tests and demos.
    pub fn under(root: &Path) -> Self {
        Self::new(
            root.join("logs"),
            root.join("configs"),
            root.join("output_videos"),
        )
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.log_dir.join(format!("task_{id}.log"))
    }

    pub fn job_spec_path(&self, id: &str) -> PathBuf {
        self.job_spec_dir.join(format!("task_{id}.json"))
    }

    pub fn output_path(&self, id: &str) -> PathBuf {
        self.output_dir.join(format!("infinitetalk_res_{id}.mp4"))
    }
}

impl Default for TaskPaths {
    fn default() -> Self {
        Self::new("logs", "configs", "output_videos")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn task_id_has_expected_shape() {
        let id = new_task_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4, "{id}");
        assert_eq!(parts[0], "video");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn task_ids_are_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
    }

    #[test]
    fn traversal_ids_are_rejected() {
        assert_matches!(validate_task_id("../etc/passwd"), Err(CoreError::Validation(_)));
        assert_matches!(validate_task_id("a/b"), Err(CoreError::Validation(_)));
        assert_matches!(validate_task_id("a\\b"), Err(CoreError::Validation(_)));
        assert_matches!(validate_task_id(""), Err(CoreError::Validation(_)));
        assert!(validate_task_id("video_20260101_120000_deadbeef").is_ok());
    }

    #[test]
    fn paths_are_derived_from_id() {
        let paths = TaskPaths::default();
        let id = "video_20260101_120000_deadbeef";
        assert_eq!(
            paths.log_path(id),
            PathBuf::from("logs/task_video_20260101_120000_deadbeef.log")
        );
        assert_eq!(
            paths.job_spec_path(id),
            PathBuf::from("configs/task_video_20260101_120000_deadbeef.json")
        );
        assert_eq!(
            paths.output_path(id),
            PathBuf::from("output_videos/infinitetalk_res_video_20260101_120000_deadbeef.mp4")
        );
    }
}
