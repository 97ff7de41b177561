use crate::core::command::CommandExecution;
use crate::core::report::ExecutionReport;
use anyhow::Result;
use std::path::Path;

/// Caller side of a job submitted to
/// [`LocalComputationManager::execute`](crate::core::manager::LocalComputationManager::execute).
///
/// `before` and `after` run on the blocking pool and may do file work in the
/// working directory. `before` runs as soon as the job is submitted, before it
/// waits for a slot; `after` runs once the slot is freed and sees the
/// directory before it is released.
pub trait ExecutionHandler: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Prepares the working directory and returns the commands to run.
    fn before(&self, working_dir: &Path) -> Result<Vec<CommandExecution>>;

    fn on_progress(&self, _execution: &CommandExecution, _index: usize) {}

    /// Turns the report into the job result, typically by reading outputs.
    fn after(&self, working_dir: &Path, report: ExecutionReport) -> Result<Self::Output>;
}

/// Progress callbacks for [`CommandExecutor::start_with_listener`](crate::core::command_executor::CommandExecutor::start_with_listener).
pub trait ExecutionListener: Send + Sync {
    fn on_execution_start(&self, _first: usize, _last: usize) {}

    fn on_execution_completion(&self, _index: usize) {}

    fn on_end(&self, _report: &ExecutionReport) {}
}
