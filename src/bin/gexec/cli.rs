use clap::Parser;
use clap_complete::Shell;
use clap_verbosity_flag::Verbosity;
use gexec::core::command::{InputFile, OutputFile};
use gexec::core::environment::DEFAULT_WORKING_DIR_PREFIX;
use gexec::utils::{parse_env_var, parse_input_file, parse_output_file, parse_timeout};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "gexec",
    author,
    version = gexec::version(),
    about = "Runs batches of commands locally, each job in its own working directory."
)]
#[command(styles = gexec::utils::STYLES)]
pub struct GExec {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Path to the config file")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Run one command, possibly several times
    Run(RunArgs),
    /// Run the command executions listed in a JSON or YAML file
    Batch(BatchArgs),
    /// Show the configuration and slot usage
    Status,
    /// Generate shell completion scripts
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, clap::Args)]
pub struct JobArgs {
    #[arg(
        long,
        help = "Prefix of the working directory name",
        default_value = DEFAULT_WORKING_DIR_PREFIX
    )]
    pub prefix: String,

    #[arg(long, help = "Keep the working directory after the job")]
    pub debug: bool,

    #[arg(
        long = "env",
        short = 'e',
        help = "Variable exported to every program (NAME=VALUE)",
        value_parser = parse_env_var
    )]
    pub env: Vec<(String, String)>,

    #[arg(
        long,
        help = "Copy produced outputs and logs of failed runs into this directory",
        value_hint = clap::ValueHint::DirPath
    )]
    pub collect: Option<PathBuf>,

    #[arg(long, help = "Print the execution report as JSON")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    #[arg(long, help = "Command id, used for log file names (default: program name)")]
    pub id: Option<String>,

    #[arg(
        long,
        short = 'n',
        help = "Number of repetitions; `{index}` in arguments and file names is replaced by 0..N",
        default_value_t = 1
    )]
    pub count: usize,

    #[arg(
        long = "input",
        short = 'i',
        help = "Input file, optionally pre-processed (NAME[:gunzip|:unzip])",
        value_parser = parse_input_file
    )]
    pub inputs: Vec<InputFile>,

    #[arg(
        long = "output",
        short = 'o',
        help = "Output file, optionally post-processed (NAME[:gzip])",
        value_parser = parse_output_file
    )]
    pub outputs: Vec<OutputFile>,

    #[arg(
        long,
        short = 't',
        help = "Kill the program after this time (HH:MM:SS, MM:SS or MM)",
        value_parser = parse_timeout
    )]
    pub timeout: Option<Duration>,

    #[command(flatten)]
    pub job: JobArgs,

    /// Program and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct BatchArgs {
    /// JSON or YAML file with a list of command executions
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    #[command(flatten)]
    pub job: JobArgs,
}
