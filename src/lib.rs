//! taskflow - task management with an audit trail
//!
//! Core library for a JSON-file task collection: validated task records,
//! recurrence scheduling, an append-only audit log, and best-effort
//! notification fan-out. The CLI in `cli` is a thin orchestration layer
//! over these modules.

pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod notify;
pub mod output;
pub mod recurrence;
pub mod store;
pub mod task;

pub use error::{Error, Result};
