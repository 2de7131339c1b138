//! Domain types and process supervision primitives for talkvid.
//!
//! Everything here is free of database and HTTP concerns. The store is
//! reached only through the [`store::TaskStore`] trait, and the
//! `supervision` module contains the OS-facing pieces (launch, signals,
//! liveness) plus the pure outcome classifier.

pub mod error;
pub mod naming;
pub mod status;
pub mod store;
pub mod supervision;
pub mod task;
pub mod types;
