//! VoxWeave Error Types
//!
//! Centralized error handling for the orchestration core.

use thiserror::Error;

/// Central error type for VoxWeave
#[derive(Error, Debug)]
pub enum VoxError {
    #[error("Event bus error: {0}")]
    Event(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Module error: {0}")]
    Module(String),

    #[error("Module validation error: {0}")]
    Validation(String),

    #[error("Circular dependency detected at module '{0}'")]
    CircularDependency(String),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for VoxWeave operations
pub type VoxResult<T> = Result<T, VoxError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for VoxError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        VoxError::Lock(err.to_string())
    }
}
