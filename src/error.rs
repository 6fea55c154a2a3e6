//! Error types for tasklink
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, bad config, unknown partition)
//! - 3: A task store could not be reached (pass aborted, nothing persisted)
//! - 4: Operation failed (I/O, serialization, lock contention)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the tasklink CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const STORE_UNAVAILABLE: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for tasklink operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    // Store failures (exit code 3)
    #[error("Task store '{store}' unavailable: {message}")]
    StoreUnavailable { store: String, message: String },

    // Operation failures (exit code 4)
    #[error("Link file {path} is corrupt: {message}")]
    LinkFileCorrupt { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Shorthand used by store adapters when their backing store fails.
    pub fn store_unavailable(store: impl Into<String>, message: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::InvalidConfig(_) | Error::InvalidArgument(_) | Error::PartitionNotFound(_) => {
                exit_codes::USER_ERROR
            }

            Error::StoreUnavailable { .. } => exit_codes::STORE_UNAVAILABLE,

            // Operation failures
            Error::LinkFileCorrupt { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON error output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::StoreUnavailable { store, message } => Some(serde_json::json!({
                "store": store,
                "message": message,
            })),
            Error::LinkFileCorrupt { path, message } => Some(serde_json::json!({
                "path": path.display().to_string(),
                "message": message,
            })),
            Error::LockFailed(path) => Some(serde_json::json!({
                "path": path.display().to_string(),
            })),
            Error::InvalidConfig(message)
            | Error::InvalidArgument(message)
            | Error::OperationFailed(message) => Some(serde_json::json!({ "message": message })),
            Error::PartitionNotFound(partition) => {
                Some(serde_json::json!({ "partition": partition }))
            }
            _ => None,
        }
    }
}

/// Result type alias for tasklink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
