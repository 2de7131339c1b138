//! Job supervision for talkvid.
//!
//! The [`Supervisor`] owns a single scheduler loop that admits queued tasks
//! under a store-backed concurrency limit, launches the generator, and
//! hands each running job to a liveness monitor. Cancellation and log
//! streaming operate on the same shared context.

pub mod admission;
pub mod cancel;
pub mod config;
pub mod context;
pub mod logs;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use cancel::{CancelError, CancelOutcome};
pub use config::SupervisorConfig;
pub use logs::{LogError, LogEvent, LogOutput, LogSnapshot, LogTail};
pub use supervisor::{DeleteError, SubmitError, SubmitTask, Supervisor};
