use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_WORKING_DIR_PREFIX: &str = "gexec";

/// Where and how a job runs: the working directory name seed, whether the
/// directory survives the job, and the variables exported to every program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    #[serde(default)]
    variables: BTreeMap<String, String>,
    #[serde(default = "default_working_dir_prefix")]
    working_dir_prefix: String,
    #[serde(default)]
    debug: bool,
}

fn default_working_dir_prefix() -> String {
    DEFAULT_WORKING_DIR_PREFIX.to_string()
}

impl Default for ExecutionEnvironment {
    fn default() -> Self {
        Self {
            variables: BTreeMap::new(),
            working_dir_prefix: default_working_dir_prefix(),
            debug: false,
        }
    }
}

impl ExecutionEnvironment {
    pub fn new(
        variables: BTreeMap<String, String>,
        working_dir_prefix: impl Into<String>,
        debug: bool,
    ) -> Self {
        Self {
            variables,
            working_dir_prefix: working_dir_prefix.into(),
            debug,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn working_dir_prefix(&self) -> &str {
        &self.working_dir_prefix
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}
