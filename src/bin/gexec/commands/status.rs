use anyhow::Result;
use gexec::config::Config;
use std::process::ExitCode;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "KEY")]
    key: &'static str,
    #[tabled(rename = "VALUE")]
    value: String,
}

pub(crate) fn handle_status(config: &Config) -> Result<ExitCode> {
    let manager = gexec::core::init_default(config.local.clone())?;
    let status = manager.resources_status();

    let config_file = gexec::core::get_config_dir()
        .map(|d| d.join("gexec.toml").display().to_string())
        .unwrap_or_else(|_| "-".to_string());
    let log_dir = config
        .logging
        .dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    let rows = vec![
        StatusRow {
            key: "version",
            value: format!("{} (server: {})", gexec::version(), manager.version()),
        },
        StatusRow {
            key: "config file",
            value: config_file,
        },
        StatusRow {
            key: "local dir",
            value: manager.local_dir().display().to_string(),
        },
        StatusRow {
            key: "log dir",
            value: log_dir,
        },
        StatusRow {
            key: "cores",
            value: format!("{}/{} busy", status.busy_cores, status.available_cores),
        },
    ];
    println!("{}", Table::new(&rows).with(Style::empty()));
    Ok(ExitCode::SUCCESS)
}
