use crate::core::error::ComputationError;
use crate::core::get_config_dir;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ENV_PREFIX: &str = "GEXEC";

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub local: LocalComputationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where working directories live and how many batches may run at once.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LocalComputationConfig {
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    #[serde(default = "default_available_cores")]
    pub available_cores: usize,
}

impl LocalComputationConfig {
    pub fn new(local_dir: impl Into<PathBuf>, available_cores: usize) -> Self {
        Self {
            local_dir: local_dir.into(),
            available_cores,
        }
    }

    pub fn validate(&self) -> Result<(), ComputationError> {
        if self.available_cores == 0 {
            return Err(ComputationError::InvalidConfig(
                "local.available_cores must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LocalComputationConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            available_cores: default_available_cores(),
        }
    }
}

fn default_local_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Directory for the daily rolling log file. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Loads `gexec.toml` from the config directory, then the given file, then
/// `GEXEC_*` variables (`GEXEC_LOCAL__AVAILABLE_CORES=4`), later sources winning.
pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    let mut config_vec = vec![];

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gexec.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            tracing::warn!("Config file {config_path:?} not found.");
        }
    }

    build_config(&config_vec, ENV_PREFIX)
}

fn build_config(files: &[PathBuf], env_prefix: &str) -> Result<Config> {
    let settings = config::Config::builder();
    let settings = files.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    let config: Config = settings
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    config.local.validate()?;
    Ok(config)
}
