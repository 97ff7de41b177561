use crate::core::command::CommandExecution;
use crate::core::engine::ExecutionEngine;
use crate::core::handler::ExecutionListener;
use crate::core::permits::PermitScheduler;
use crate::core::report::ExecutionReport;
use crate::core::working_dir::WorkingDirectory;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Blocking front end over the engine that keeps one working directory for
/// several batches, so later batches can read what earlier ones produced.
///
/// Every `start*` call blocks on the manager's runtime and therefore must not
/// be made from inside an async task.
pub struct CommandExecutor {
    working_dir: Arc<WorkingDirectory>,
    variables: BTreeMap<String, String>,
    scheduler: PermitScheduler,
    engine: ExecutionEngine,
    runtime: Handle,
}

impl CommandExecutor {
    pub(crate) fn new(
        working_dir: WorkingDirectory,
        variables: BTreeMap<String, String>,
        scheduler: PermitScheduler,
        engine: ExecutionEngine,
        runtime: Handle,
    ) -> Self {
        Self {
            working_dir: Arc::new(working_dir),
            variables,
            scheduler,
            engine,
            runtime,
        }
    }

    pub fn working_dir(&self) -> &Path {
        self.working_dir.path()
    }

    /// Runs the batch while holding one slot.
    pub fn start(&self, executions: &[CommandExecution]) -> Result<ExecutionReport> {
        for execution in executions {
            execution.validate()?;
        }
        self.runtime.block_on(async {
            let _permit = self.scheduler.enter().await?;
            self.engine
                .run_batch(&self.working_dir, executions, &self.variables, None)
                .await
        })
    }

    /// Runs a single execution, reporting its repetitions to `listener`.
    pub fn start_with_listener(
        &self,
        execution: &CommandExecution,
        listener: &dyn ExecutionListener,
    ) -> Result<ExecutionReport> {
        execution.validate()?;
        listener.on_execution_start(0, execution.execution_count() - 1);

        let monitor = |_: &CommandExecution, index: usize| listener.on_execution_completion(index);
        let report = self.runtime.block_on(async {
            let _permit = self.scheduler.enter().await?;
            self.engine
                .run_batch(
                    &self.working_dir,
                    std::slice::from_ref(execution),
                    &self.variables,
                    Some(&monitor),
                )
                .await
        })?;

        listener.on_end(&report);
        Ok(report)
    }

    /// Releases the working directory. Dropping the executor does the same
    /// but only logs failures.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.working_dir) {
            Ok(working_dir) => working_dir.release(),
            // a file step is still using it; removed once that step ends
            Err(_) => Ok(()),
        }
    }
}
