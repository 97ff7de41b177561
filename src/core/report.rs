use crate::core::command::Command;
use crate::core::error::ComputationError;
use serde::Serialize;
use std::fmt;

/// A repetition of a command that exited with a nonzero code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionError {
    command: Command,
    index: usize,
    exit_code: i32,
}

impl ExecutionError {
    pub fn new(command: Command, index: usize, exit_code: i32) -> Self {
        Self {
            command,
            index,
            exit_code,
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command '{}' #{} exited with code {}",
            self.command.id(),
            self.index,
            self.exit_code
        )
    }
}

/// Outcome of one batch. An empty error list is the only "all succeeded" signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    errors: Vec<ExecutionError>,
}

impl ExecutionReport {
    pub fn new(errors: Vec<ExecutionError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ExecutionError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ExecutionError> {
        self.errors
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Emits one warning per failed repetition.
    pub fn log(&self) {
        for error in &self.errors {
            tracing::warn!(
                command = error.command.id(),
                index = error.index,
                exit_code = error.exit_code,
                "Execution of '{}' failed",
                error.command.to_command_line(&error.index.to_string())
            );
        }
    }

    pub fn ensure_success(&self) -> Result<(), ComputationError> {
        match self.errors.first() {
            None => Ok(()),
            Some(first) => Err(ComputationError::CommandsFailed {
                count: self.errors.len(),
                first: first.to_string(),
            }),
        }
    }
}
