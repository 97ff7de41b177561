pub mod command;
pub mod command_executor;
pub mod engine;
pub mod environment;
pub mod error;
pub mod executor;
pub mod handler;
pub mod manager;
pub mod permits;
pub mod pipeline;
pub mod report;
pub mod working_dir;

pub use command::{
    Command, CommandExecution, CommandKind, FilePostProcessor, FilePreProcessor, InputFile,
    OutputFile, SubCommand,
};
pub use command_executor::CommandExecutor;
pub use engine::{ChannelMonitor, ExecutionEngine, ExecutionMonitor, ProgressEvent};
pub use environment::ExecutionEnvironment;
pub use error::ComputationError;
pub use executor::{Invocation, ProcessExecutor, ShellExecutor};
pub use handler::{ExecutionHandler, ExecutionListener};
pub use manager::{
    default_instance, init_default, shutdown_default, ExecutionHandle, JobState,
    LocalComputationManager,
};
pub use permits::ComputationResourcesStatus;
pub use report::{ExecutionError, ExecutionReport};

use std::path::PathBuf;

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("gexec"))
}
