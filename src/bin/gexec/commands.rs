use crate::cli::{Commands, JobArgs};
use anyhow::{Context, Result};
use gexec::config::Config;
use gexec::core::command::CommandExecution;
use gexec::core::environment::ExecutionEnvironment;
use gexec::core::handler::ExecutionHandler;
use gexec::core::pipeline::log_file_name;
use gexec::core::report::ExecutionReport;
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

mod batch;
mod completions;
mod run;
mod status;

/// Exit code used when the user interrupts a job.
const INTERRUPTED: u8 = 130;

pub async fn handle_commands(config: &Config, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run(run_args) => run::handle_run(config, run_args).await,
        Commands::Batch(batch_args) => batch::handle_batch(config, batch_args).await,
        Commands::Status => status::handle_status(config),
        Commands::Completions { shell } => completions::handle_completions(shell),
    }
}

/// Job submitted by the CLI: fixed executions, optional collection of
/// results before the working directory goes away.
struct CliJob {
    executions: Vec<CommandExecution>,
    collect: Option<PathBuf>,
}

impl ExecutionHandler for CliJob {
    type Output = ExecutionReport;

    fn before(&self, working_dir: &Path) -> Result<Vec<CommandExecution>> {
        tracing::info!("Working directory: {}", working_dir.display());
        Ok(self.executions.clone())
    }

    fn on_progress(&self, execution: &CommandExecution, index: usize) {
        tracing::info!(
            "{} [{}/{}] done",
            execution.command().id(),
            index + 1,
            execution.execution_count()
        );
    }

    fn after(&self, working_dir: &Path, report: ExecutionReport) -> Result<ExecutionReport> {
        if let Some(destination) = &self.collect {
            collect_results(working_dir, destination, &self.executions, &report)?;
        }
        Ok(report)
    }
}

fn collect_results(
    working_dir: &Path,
    destination: &Path,
    executions: &[CommandExecution],
    report: &ExecutionReport,
) -> Result<()> {
    std::fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create {}", destination.display()))?;

    let mut names = Vec::new();
    for execution in executions {
        for index in execution.indices() {
            for output in execution.command().output_files(&index.to_string()) {
                names.push(output.name().to_string());
                names.push(format!("{}.gz", output.name()));
            }
        }
    }
    for error in report.errors() {
        names.push(log_file_name(error.command().id(), error.index()));
    }

    let mut copied = 0;
    for name in names {
        let source = working_dir.join(&name);
        if !source.is_file() {
            continue;
        }
        let target = destination.join(&name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::copy(&source, &target)
            .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
        copied += 1;
    }
    tracing::info!("Collected {copied} file(s) into {}", destination.display());
    Ok(())
}

/// Submits the executions to the default manager and prints the outcome.
async fn submit(
    config: &Config,
    executions: Vec<CommandExecution>,
    job: JobArgs,
) -> Result<ExitCode> {
    let manager = gexec::core::init_default(config.local.clone())?;
    let variables: BTreeMap<String, String> = job.env.into_iter().collect();
    let environment = ExecutionEnvironment::new(variables, job.prefix, job.debug);
    let total: usize = executions.iter().map(|e| e.execution_count()).sum();

    let started = Instant::now();
    let mut handle = manager.execute(
        environment,
        CliJob {
            executions,
            collect: job.collect,
        },
    );

    let outcome = tokio::select! {
        result = &mut handle => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(result) = outcome else {
        handle.cancel();
        let _ = handle.await;
        eprintln!("{}", "Interrupted".yellow());
        return Ok(ExitCode::from(INTERRUPTED));
    };
    let report = result?;

    if job.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, total, started.elapsed());
    }
    Ok(if report.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &ExecutionReport, total: usize, elapsed: std::time::Duration) {
    use tabled::{settings::Style, Table, Tabled};

    #[derive(Tabled)]
    struct ErrorRow {
        #[tabled(rename = "COMMAND")]
        command: String,
        #[tabled(rename = "INDEX")]
        index: usize,
        #[tabled(rename = "EXIT")]
        exit_code: String,
        #[tabled(rename = "LOG")]
        log: String,
    }

    let elapsed = gexec::utils::format_elapsed(elapsed);
    if report.is_ok() {
        println!(
            "{} {total} execution(s) succeeded in {elapsed}",
            "OK".green().bold()
        );
        return;
    }

    let rows: Vec<ErrorRow> = report
        .errors()
        .iter()
        .map(|e| ErrorRow {
            command: e.command().to_command_line(&e.index().to_string()),
            index: e.index(),
            exit_code: e.exit_code().to_string().red().to_string(),
            log: log_file_name(e.command().id(), e.index()),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::empty()));
    println!(
        "{} {} of {total} execution(s) failed in {elapsed}",
        "FAILED".red().bold(),
        report.errors().len()
    );
}
