use crate::core::command::{Command, CommandExecution};
use crate::core::executor::{Invocation, ProcessExecutor};
use crate::core::pipeline;
use crate::core::report::{ExecutionError, ExecutionReport};
use crate::core::working_dir::WorkingDirectory;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Notified after every repetition of every command, in execution order.
pub trait ExecutionMonitor: Send + Sync {
    fn on_progress(&self, execution: &CommandExecution, index: usize);
}

impl<F> ExecutionMonitor for F
where
    F: Fn(&CommandExecution, usize) + Send + Sync,
{
    fn on_progress(&self, execution: &CommandExecution, index: usize) {
        self(execution, index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub command_id: String,
    pub index: usize,
    pub execution_count: usize,
}

/// Forwards progress to an unbounded channel. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelMonitor {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelMonitor {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ExecutionMonitor for ChannelMonitor {
    fn on_progress(&self, execution: &CommandExecution, index: usize) {
        let _ = self.sender.send(ProgressEvent {
            command_id: execution.command().id().to_string(),
            index,
            execution_count: execution.execution_count(),
        });
    }
}

/// Runs batches of command executions sequentially inside one working directory.
#[derive(Clone)]
pub struct ExecutionEngine {
    common_dir: PathBuf,
    executor: Arc<dyn ProcessExecutor>,
}

impl ExecutionEngine {
    pub fn new(common_dir: impl Into<PathBuf>, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            common_dir: common_dir.into(),
            executor,
        }
    }

    pub fn common_dir(&self) -> &Path {
        &self.common_dir
    }

    /// Runs every repetition of every execution in order.
    ///
    /// Nonzero exit codes end up in the report; missing inputs and I/O or
    /// process failures abort the batch with an error.
    ///
    /// File steps on the blocking pool keep their own reference to
    /// `working_dir`, so dropping this future never removes the directory
    /// under a step that is still running.
    pub async fn run_batch(
        &self,
        working_dir: &Arc<WorkingDirectory>,
        executions: &[CommandExecution],
        variables: &BTreeMap<String, String>,
        monitor: Option<&dyn ExecutionMonitor>,
    ) -> Result<ExecutionReport> {
        let variables = pipeline::execution_variables(variables, working_dir.path())?;
        let mut errors = Vec::new();

        for execution in executions {
            let command = execution.command();
            for index in execution.indices() {
                let exit_code = self
                    .run_repetition(working_dir, command, index, &variables)
                    .await?;
                if exit_code != 0 {
                    errors.push(ExecutionError::new(command.clone(), index, exit_code));
                }
                if let Some(monitor) = monitor {
                    monitor.on_progress(execution, index);
                }
            }
        }

        Ok(ExecutionReport::new(errors))
    }

    async fn run_repetition(
        &self,
        working_dir: &Arc<WorkingDirectory>,
        command: &Command,
        index: usize,
        variables: &BTreeMap<String, String>,
    ) -> Result<i32> {
        let index_str = index.to_string();

        let inputs = command.input_files(&index_str);
        if !inputs.is_empty() {
            let (working, common) = (Arc::clone(working_dir), self.common_dir.clone());
            tokio::task::spawn_blocking(move || {
                pipeline::pre_process(working.path(), &common, &inputs)
            })
                .await
                .context("Pre-processing task panicked")??;
        }

        let log_file = working_dir.path().join(pipeline::log_file_name(command.id(), index));
        let mut exit_code = 0;
        for sub_command in command.sub_commands() {
            let invocation = Invocation {
                command_line: pipeline::build_command_line(
                    sub_command.program(),
                    &sub_command.args_for(&index_str),
                    variables,
                ),
                working_dir: working_dir.path().to_path_buf(),
                log_file: log_file.clone(),
                timeout: sub_command.timeout_duration(),
            };
            tracing::debug!("Executing {}", invocation.command_line);

            let started = Instant::now();
            exit_code = self
                .executor
                .execute(&invocation)
                .await
                .with_context(|| format!("Failed to execute command '{}' #{index}", command.id()))?;
            tracing::debug!(
                "Command '{}' #{index} finished with code {exit_code} in {:?}",
                command.id(),
                started.elapsed()
            );

            if exit_code != 0 {
                break;
            }
        }

        if exit_code == 0 {
            let outputs = command.output_files(&index_str);
            if !outputs.is_empty() {
                let working = Arc::clone(working_dir);
                tokio::task::spawn_blocking(move || pipeline::post_process(working.path(), &outputs))
                    .await
                    .context("Post-processing task panicked")??;
            }
        }

        Ok(exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::{FilePostProcessor, InputFile, OutputFile, SubCommand};
    use crate::core::error::ComputationError;
    use crate::core::executor::MockProcessExecutor;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _root: TempDir,
        working: Arc<WorkingDirectory>,
        common: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let working = Arc::new(WorkingDirectory::acquire(root.path(), "work", false).unwrap());
        let common = root.path().join("common");
        std::fs::create_dir(&common).unwrap();
        Fixture {
            _root: root,
            working,
            common,
        }
    }

    fn engine(fixture: &Fixture, mock: MockProcessExecutor) -> ExecutionEngine {
        ExecutionEngine::new(&fixture.common, Arc::new(mock))
    }

    fn simple(id: &str, program: &str, count: usize) -> CommandExecution {
        let command = Command::simple().id(id).program(program).build().unwrap();
        CommandExecution::new(command, count).unwrap()
    }

    #[tokio::test]
    async fn test_missing_input_spawns_nothing() {
        let f = fixture();
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute().times(0);

        let command = Command::simple()
            .id("needs_input")
            .program("cat")
            .args(["x.txt"])
            .input_file(InputFile::new("x.txt"))
            .build()
            .unwrap();
        let executions = [CommandExecution::new(command, 1).unwrap()];

        let err = engine(&f, mock)
            .run_batch(&f.working, &executions, &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ComputationError>(),
            Some(ComputationError::InputFileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_error_count_matches_failing_repetitions() {
        let f = fixture();
        let mut mock = MockProcessExecutor::new();
        // every odd repetition of "flaky" fails
        mock.expect_execute().times(5).returning(|inv| {
            if inv.command_line.ends_with("flaky 1") || inv.command_line.ends_with("flaky 3") {
                Ok(2)
            } else {
                Ok(0)
            }
        });

        let command = Command::simple()
            .id("flaky")
            .program("flaky")
            .args(["{index}"])
            .build()
            .unwrap();
        let executions = [
            CommandExecution::new(command, 4).unwrap(),
            simple("ok", "ok", 1),
        ];

        let report = engine(&f, mock)
            .run_batch(&f.working, &executions, &BTreeMap::new(), None)
            .await
            .unwrap();
        let failed: Vec<(usize, i32)> = report
            .errors()
            .iter()
            .map(|e| (e.index(), e.exit_code()))
            .collect();
        assert_eq!(failed, vec![(1, 2), (3, 2)]);
        assert!(report.errors().iter().all(|e| e.command().id() == "flaky"));
    }

    #[tokio::test]
    async fn test_group_stops_at_first_failure() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut mock = MockProcessExecutor::new();
        {
            let seen = Arc::clone(&seen);
            mock.expect_execute().returning(move |inv| {
                seen.lock().unwrap().push(inv.command_line.clone());
                Ok(if inv.command_line.ends_with("second") { 7 } else { 0 })
            });
        }

        let command = Command::group()
            .id("grp")
            .sub_command(SubCommand::new("first"))
            .sub_command(SubCommand::new("second"))
            .sub_command(SubCommand::new("third"))
            .output_file(OutputFile::with_post_processor("out.txt", FilePostProcessor::Gzip))
            .build()
            .unwrap();
        std::fs::write(f.working.path().join("out.txt"), b"partial").unwrap();
        let executions = [CommandExecution::new(command, 1).unwrap()];

        let report = engine(&f, mock)
            .run_batch(&f.working, &executions, &BTreeMap::new(), None)
            .await
            .unwrap();

        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].exit_code(), 7);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|line| !line.ends_with("third")));
        // no post-processing after a failure
        assert!(!f.working.path().join("out.txt.gz").exists());
    }

    #[tokio::test]
    async fn test_invocations_in_order_with_environment() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut mock = MockProcessExecutor::new();
        {
            let seen = Arc::clone(&seen);
            mock.expect_execute().returning(move |inv| {
                seen.lock().unwrap().push(inv.clone());
                Ok(0)
            });
        }

        let executions = [simple("a", "prog_a", 2), simple("b", "prog_b", 1)];
        let mut variables = BTreeMap::new();
        variables.insert("MODE".to_string(), "x".to_string());

        let progress = Mutex::new(Vec::new());
        let monitor = |execution: &CommandExecution, index: usize| {
            progress
                .lock()
                .unwrap()
                .push(format!("{}#{index}", execution.command().id()));
        };
        engine(&f, mock)
            .run_batch(&f.working, &executions, &variables, Some(&monitor))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let programs: Vec<&str> = seen
            .iter()
            .map(|inv| inv.command_line.rsplit("; ").next().unwrap())
            .collect();
        assert_eq!(programs, vec!["prog_a", "prog_a", "prog_b"]);
        assert_eq!(seen[1].log_file, f.working.path().join("a_1.out"));
        assert!(seen[0].command_line.contains("export MODE=x; "));
        assert!(seen[0].command_line.contains("export TMPDIR="));
        assert_eq!(*progress.lock().unwrap(), vec!["a#0", "a#1", "b#0"]);
    }

    #[tokio::test]
    async fn test_channel_monitor_publishes_events() {
        let f = fixture();
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute().returning(|_| Ok(0));

        let (monitor, mut events) = ChannelMonitor::channel();
        engine(&f, mock)
            .run_batch(&f.working, &[simple("c", "c", 2)], &BTreeMap::new(), Some(&monitor))
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!((first.command_id.as_str(), first.index), ("c", 0));
        assert_eq!((second.index, second.execution_count), (1, 2));
    }

    #[tokio::test]
    async fn test_executor_failure_aborts_batch() {
        let f = fixture();
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("spawn failed")));

        let result = engine(&f, mock)
            .run_batch(&f.working, &[simple("a", "a", 3)], &BTreeMap::new(), None)
            .await;
        assert!(format!("{:#}", result.unwrap_err()).contains("spawn failed"));
    }
}
