use crate::cli::RunArgs;
use anyhow::{Context, Result};
use gexec::config::Config;
use gexec::core::command::{Command, CommandExecution};
use std::borrow::Cow;
use std::path::Path;
use std::process::ExitCode;

pub(crate) async fn handle_run(config: &Config, args: RunArgs) -> Result<ExitCode> {
    let execution = build_execution(&args)?;
    super::submit(config, vec![execution], args.job).await
}

/// Command line words are quoted so the shell passes them through untouched.
fn build_execution(args: &RunArgs) -> Result<CommandExecution> {
    let (program, program_args) = args
        .command
        .split_first()
        .context("No program given")?;

    let id = match &args.id {
        Some(id) => id.clone(),
        None => default_id(program),
    };
    let mut builder = Command::simple()
        .id(id)
        .program(escape(program))
        .args(program_args.iter().map(|a| escape(a)));
    if let Some(timeout) = args.timeout {
        builder = builder.timeout(timeout);
    }
    for input in &args.inputs {
        builder = builder.input_file(input.clone());
    }
    for output in &args.outputs {
        builder = builder.output_file(output.clone());
    }

    Ok(CommandExecution::new(builder.build()?, args.count)?)
}

fn escape(word: &str) -> String {
    shell_escape::escape(Cow::from(word)).into_owned()
}

fn default_id(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "command".to_string())
}
