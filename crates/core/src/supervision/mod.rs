//! OS-facing job supervision primitives.
//!
//! - [`launcher`] writes the job spec and spawns the detached generator.
//! - [`classifier`] turns an exit code plus log tail into a verdict.
//! - [`process`] wraps pid liveness checks and signal delivery.

pub mod classifier;
pub mod launcher;
pub mod process;
