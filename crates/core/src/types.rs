/// Task identifiers are externally visible strings (see [`crate::naming::new_task_id`]).
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
