//! Core error types.
//!
//! Defines `CoreError` for every failure the object layer can report and the
//! propagation policy around it:
//! - `NotFound` → expected miss, consumers render a placeholder
//! - `RetrievalFailure` → backend read failed, surfaced as-is
//! - `ToolUnavailable` → optional tool missing, triggers the next fallback
//! - `ToolExecution` → required tool failed to launch or timed out

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailure(String),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
