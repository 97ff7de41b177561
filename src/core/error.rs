use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a batch, as opposed to a nonzero exit code which is
/// only recorded in the [`ExecutionReport`](crate::core::report::ExecutionReport).
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<ComputationError>()`
/// to tell them apart from plain I/O failures.
#[derive(Debug, Error)]
pub enum ComputationError {
    #[error("Input file '{name}' not found in the working and common directory")]
    InputFileNotFound { name: String },

    #[error("Archive entry '{entry}' in {archive:?} escapes the working directory")]
    UnsafeArchiveEntry { archive: PathBuf, entry: String },

    #[error("Invalid command '{id}': {reason}")]
    InvalidCommand { id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{count} command execution(s) failed, first: {first}")]
    CommandsFailed { count: usize, first: String },

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Computation manager is closed")]
    Closed,
}

impl ComputationError {
    pub fn invalid_command(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
