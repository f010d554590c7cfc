//! Error types for taskflow
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad input, unknown task)
//! - 4: Operation failed (corrupt storage, io, lock contention)
//!
//! Absence ("task not found") is a value-level condition and is reported
//! through `Option`/`bool` returns, not through this enum; only the CLI
//! surfaces it here when it has to exit non-zero.

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the taskflow CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskflow operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task not found: {0}")]
    TaskNotFound(u64),

    // Operation failures (exit code 4)
    #[error("Corrupt task storage at {path}: {detail}")]
    CorruptStorage { path: PathBuf, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Event publish failed: {0}")]
    PublishFailed(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidTask(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::TaskNotFound(_) => exit_codes::USER_ERROR,

            Error::CorruptStorage { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::LockFailed(_)
            | Error::PublishFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Whether this failure means the persisted collection itself is bad,
    /// as opposed to a bad request. Callers map this to a 5xx-class outcome.
    pub fn is_corrupt_storage(&self) -> bool {
        matches!(self, Error::CorruptStorage { .. })
    }

    /// Structured detail for JSON error envelopes, where it exists.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::CorruptStorage { path, detail } => Some(serde_json::json!({
                "path": path.display().to_string(),
                "detail": detail,
            })),
            Error::TaskNotFound(id) => Some(serde_json::json!({ "task_id": id })),
            Error::LockFailed(path) => Some(serde_json::json!({
                "path": path.display().to_string(),
            })),
            _ => None,
        }
    }
}

/// Result type alias for taskflow operations
pub type Result<T> = std::result::Result<T, Error>;
