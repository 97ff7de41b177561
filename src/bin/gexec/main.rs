use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;

mod cli;
mod commands;

#[cfg(target_arch = "x86_64")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let gexec = cli::GExec::parse();

    let config = gexec::config::load_config(gexec.config.as_ref())?;
    let _guard = gexec::logging::init(
        LevelFilter::from(gexec.verbosity),
        config.logging.dir.as_deref(),
    )?;

    let result = commands::handle_commands(&config, gexec.command).await;
    if let Err(e) = gexec::core::shutdown_default() {
        tracing::warn!("Failed to shut down computation manager: {e:#}");
    }
    result
}
