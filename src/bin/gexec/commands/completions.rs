use crate::cli::GExec;
use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::io;
use std::process::ExitCode;

pub(crate) fn handle_completions(shell: Shell) -> Result<ExitCode> {
    let mut cmd = GExec::command();

    generate(shell, &mut cmd, env!("CARGO_BIN_NAME"), &mut io::stdout());

    Ok(ExitCode::SUCCESS)
}
