use crate::config::LocalComputationConfig;
use crate::core::command::CommandExecution;
use crate::core::command_executor::CommandExecutor;
use crate::core::engine::ExecutionEngine;
use crate::core::environment::{ExecutionEnvironment, DEFAULT_WORKING_DIR_PREFIX};
use crate::core::error::ComputationError;
use crate::core::executor::{ProcessExecutor, ShellExecutor};
use crate::core::handler::ExecutionHandler;
use crate::core::permits::{ComputationResourcesStatus, PermitScheduler};
use crate::core::working_dir::WorkingDirectory;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use strum::{Display, FromRepr};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub const LOCAL_VERSION: &str = "none (local mode)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, FromRepr)]
#[repr(u8)]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(JobState::Submitted as u8)))
    }

    fn get(&self) -> JobState {
        JobState::from_repr(self.0.load(Ordering::Acquire)).unwrap_or(JobState::Failed)
    }

    /// Moves to `next` unless a terminal state was reached first.
    fn advance(&self, next: JobState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match JobState::from_repr(current) {
                    Some(state) if !state.is_terminal() => Some(next as u8),
                    _ => None,
                }
            })
            .is_ok()
    }
}

/// A submitted job. Await it for the handler's output.
///
/// Dropping the handle detaches the job; use [`ExecutionHandle::cancel`] to stop it.
pub struct ExecutionHandle<R> {
    task: JoinHandle<Result<R>>,
    state: SharedState,
}

impl<R> ExecutionHandle<R> {
    pub fn state(&self) -> JobState {
        self.state.get()
    }

    /// Stops the job. A job waiting for a slot never runs its commands; a
    /// running one has its process killed. Either way the slot and the working
    /// directory are released.
    ///
    /// A blocking step already in progress (`before`, `after` or a file
    /// pre/post-processing step) is not interrupted: it runs to completion and
    /// the working directory is removed after it.
    pub fn cancel(&self) {
        if self.state.advance(JobState::Cancelled) {
            tracing::debug!("Cancelling job");
            self.task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<R> Future for ExecutionHandle<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let joined = match Pin::new(&mut self.task).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(joined) => joined,
        };
        if self.state.get() == JobState::Cancelled {
            return Poll::Ready(Err(ComputationError::Cancelled.into()));
        }
        Poll::Ready(match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ComputationError::Cancelled.into()),
            Err(e) => {
                self.state.advance(JobState::Failed);
                Err(anyhow!("Job panicked: {e}"))
            }
        })
    }
}

pub struct LocalComputationManagerBuilder {
    config: LocalComputationConfig,
    executor: Option<Arc<dyn ProcessExecutor>>,
    runtime: Option<Handle>,
}

impl LocalComputationManagerBuilder {
    pub fn new(config: LocalComputationConfig) -> Self {
        Self {
            config,
            executor: None,
            runtime: None,
        }
    }

    pub fn executor(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Runtime jobs are spawned on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<LocalComputationManager> {
        self.config.validate()?;
        let scheduler = PermitScheduler::new(self.config.available_cores)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .context("A tokio runtime is required to build a computation manager")?,
        };

        std::fs::create_dir_all(&self.config.local_dir).with_context(|| {
            format!(
                "Failed to create local directory {}",
                self.config.local_dir.display()
            )
        })?;
        let local_dir = std::path::absolute(&self.config.local_dir).with_context(|| {
            format!("Failed to resolve {}", self.config.local_dir.display())
        })?;

        let common_dir = WorkingDirectory::acquire(
            &local_dir,
            &format!("{DEFAULT_WORKING_DIR_PREFIX}_common"),
            false,
        )?;
        let engine = ExecutionEngine::new(
            common_dir.path(),
            self.executor.unwrap_or_else(|| Arc::new(ShellExecutor)),
        );

        tracing::info!(
            "Local computation manager started in {} with {} core(s)",
            local_dir.display(),
            self.config.available_cores
        );

        Ok(LocalComputationManager {
            config: LocalComputationConfig::new(local_dir, self.config.available_cores),
            scheduler,
            engine,
            common_dir: Mutex::new(Some(common_dir)),
            runtime,
            closed: AtomicBool::new(false),
        })
    }
}

/// Runs jobs as local processes, each in its own working directory, with at
/// most `available_cores` jobs holding a slot at once.
pub struct LocalComputationManager {
    config: LocalComputationConfig,
    scheduler: PermitScheduler,
    engine: ExecutionEngine,
    common_dir: Mutex<Option<WorkingDirectory>>,
    runtime: Handle,
    closed: AtomicBool,
}

impl LocalComputationManager {
    pub fn new(config: LocalComputationConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: LocalComputationConfig) -> LocalComputationManagerBuilder {
        LocalComputationManagerBuilder::new(config)
    }

    /// Submits a job and returns immediately.
    pub fn execute<H: ExecutionHandler>(
        &self,
        environment: ExecutionEnvironment,
        handler: H,
    ) -> ExecutionHandle<H::Output> {
        let state = SharedState::new();
        let task = if self.is_closed() {
            self.runtime
                .spawn(async { Err::<H::Output, _>(anyhow::Error::from(ComputationError::Closed)) })
        } else {
            let job = Job {
                scheduler: self.scheduler.clone(),
                engine: self.engine.clone(),
                local_dir: self.config.local_dir.clone(),
                environment,
                handler: Arc::new(handler),
                state: state.clone(),
            };
            self.runtime.spawn(job.run())
        };
        ExecutionHandle { task, state }
    }

    /// Synchronous executor reusing one working directory across batches.
    pub fn new_command_executor(
        &self,
        variables: BTreeMap<String, String>,
        working_dir_prefix: &str,
        debug: bool,
    ) -> Result<CommandExecutor> {
        if self.is_closed() {
            return Err(ComputationError::Closed.into());
        }
        let working_dir =
            WorkingDirectory::acquire(&self.config.local_dir, working_dir_prefix, debug)?;
        Ok(CommandExecutor::new(
            working_dir,
            variables,
            self.scheduler.clone(),
            self.engine.clone(),
            self.runtime.clone(),
        ))
    }

    pub fn resources_status(&self) -> ComputationResourcesStatus {
        self.scheduler.status()
    }

    pub fn local_dir(&self) -> &Path {
        &self.config.local_dir
    }

    pub fn config(&self) -> &LocalComputationConfig {
        &self.config
    }

    pub fn version(&self) -> &'static str {
        LOCAL_VERSION
    }

    pub fn common_dir(&self) -> &Path {
        self.engine.common_dir()
    }

    /// Creates (or truncates) a file in the common directory, visible to every job.
    pub fn new_common_file(&self, name: &str) -> Result<std::fs::File> {
        if self.is_closed() {
            return Err(ComputationError::Closed.into());
        }
        let path = self.common_dir().join(name);
        std::fs::File::create(&path)
            .with_context(|| format!("Failed to create common file {}", path.display()))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Releases the common directory. Calling it again does nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let common_dir = self
            .common_dir
            .lock()
            .map_err(|_| anyhow!("Common directory lock poisoned"))?
            .take();
        if let Some(common_dir) = common_dir {
            common_dir.release()?;
        }
        tracing::debug!("Local computation manager closed");
        Ok(())
    }
}

struct Job<H: ExecutionHandler> {
    scheduler: PermitScheduler,
    engine: ExecutionEngine,
    local_dir: PathBuf,
    environment: ExecutionEnvironment,
    handler: Arc<H>,
    state: SharedState,
}

impl<H: ExecutionHandler> Job<H> {
    async fn run(self) -> Result<H::Output> {
        let result = self.run_inner().await;
        self.state.advance(if result.is_ok() {
            JobState::Completed
        } else {
            JobState::Failed
        });
        if let Err(e) = &result {
            tracing::debug!("Job failed: {e:#}");
        }
        result
    }

    async fn run_inner(&self) -> Result<H::Output> {
        let working_dir = {
            let root = self.local_dir.clone();
            let prefix = self.environment.working_dir_prefix().to_string();
            let debug = self.environment.is_debug();
            tokio::task::spawn_blocking(move || WorkingDirectory::acquire(&root, &prefix, debug))
                .await
                .context("Working directory task panicked")??
        };
        // blocking steps hold a clone, so an aborted job removes it only after they end
        let working_dir = Arc::new(working_dir);

        let executions: Vec<CommandExecution> = {
            let handler = Arc::clone(&self.handler);
            let working_dir = Arc::clone(&working_dir);
            tokio::task::spawn_blocking(move || handler.before(working_dir.path()))
                .await
                .context("Handler task panicked")??
        };
        for execution in &executions {
            execution.validate()?;
        }

        let permit = self.scheduler.enter().await?;
        self.state.advance(JobState::Running);

        let handler = &self.handler;
        let monitor =
            |execution: &CommandExecution, index: usize| handler.on_progress(execution, index);
        let report = self
            .engine
            .run_batch(
                &working_dir,
                &executions,
                self.environment.variables(),
                Some(&monitor),
            )
            .await;
        permit.exit();
        let report = report?;
        report.log();

        let output = {
            let handler = Arc::clone(&self.handler);
            let working_dir = Arc::clone(&working_dir);
            tokio::task::spawn_blocking(move || handler.after(working_dir.path(), report))
                .await
                .context("Handler task panicked")??
        };

        let Ok(working_dir) = Arc::try_unwrap(working_dir) else {
            return Ok(output);
        };
        match tokio::task::spawn_blocking(move || working_dir.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("{e:#}"),
            Err(e) => tracing::warn!("Working directory release task failed: {e}"),
        }
        Ok(output)
    }
}

static DEFAULT_MANAGER: Mutex<Option<Arc<LocalComputationManager>>> = Mutex::new(None);

/// Process-wide manager built from the loaded configuration on first use.
pub fn default_instance() -> Result<Arc<LocalComputationManager>> {
    default_instance_with(|| Ok(crate::config::load_config(None)?.local))
}

/// Like [`default_instance`], but builds from `config` if no default exists yet.
pub fn init_default(config: LocalComputationConfig) -> Result<Arc<LocalComputationManager>> {
    default_instance_with(|| Ok(config))
}

fn default_instance_with(
    config: impl FnOnce() -> Result<LocalComputationConfig>,
) -> Result<Arc<LocalComputationManager>> {
    let mut guard = DEFAULT_MANAGER
        .lock()
        .map_err(|_| anyhow!("Default manager lock poisoned"))?;
    if let Some(manager) = guard.as_ref() {
        return Ok(Arc::clone(manager));
    }
    let manager = Arc::new(LocalComputationManager::new(config()?)?);
    *guard = Some(Arc::clone(&manager));
    Ok(manager)
}

/// Closes and forgets the default manager, if one was built.
pub fn shutdown_default() -> Result<()> {
    let manager = DEFAULT_MANAGER
        .lock()
        .map_err(|_| anyhow!("Default manager lock poisoned"))?
        .take();
    match manager {
        Some(manager) => manager.close(),
        None => Ok(()),
    }
}
