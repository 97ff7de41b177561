use crate::core::error::ComputationError;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Duration;
use strum::{Display, EnumString};

/// Placeholder replaced by the repetition index in arguments and file names.
pub const INDEX_PLACEHOLDER: &str = "{index}";

fn render(template: &str, index: &str) -> String {
    template.replace(INDEX_PLACEHOLDER, index)
}

/// Transformation applied to an input file as it enters the working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
pub enum FilePreProcessor {
    #[strum(to_string = "gunzip", serialize = "gz")]
    Gunzip,
    #[strum(to_string = "archive_unzip", serialize = "unzip")]
    ArchiveUnzip,
}

/// Transformation applied to an output file after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
pub enum FilePostProcessor {
    #[strum(to_string = "gzip", serialize = "gz")]
    Gzip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_processor: Option<FilePreProcessor>,
}

impl InputFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pre_processor: None,
        }
    }

    pub fn with_pre_processor(name: impl Into<String>, pre_processor: FilePreProcessor) -> Self {
        Self {
            name: name.into(),
            pre_processor: Some(pre_processor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pre_processor(&self) -> Option<FilePreProcessor> {
        self.pre_processor
    }

    fn resolve(&self, index: &str) -> Self {
        Self {
            name: render(&self.name, index),
            pre_processor: self.pre_processor,
        }
    }

    fn validate(&self, id: &str) -> Result<(), ComputationError> {
        if self.name.is_empty() {
            return Err(ComputationError::invalid_command(id, "empty input file name"));
        }
        let (processor, required_suffix) = match self.pre_processor {
            None => return Ok(()),
            Some(p @ FilePreProcessor::Gunzip) => (p, ".gz"),
            Some(p @ FilePreProcessor::ArchiveUnzip) => (p, ".zip"),
        };
        if self.name.len() <= required_suffix.len() || !self.name.ends_with(required_suffix) {
            return Err(ComputationError::invalid_command(
                id,
                format!(
                    "input file '{}' must end with '{required_suffix}' to be pre-processed with {processor}",
                    self.name
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    post_processor: Option<FilePostProcessor>,
}

impl OutputFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            post_processor: None,
        }
    }

    pub fn with_post_processor(name: impl Into<String>, post_processor: FilePostProcessor) -> Self {
        Self {
            name: name.into(),
            post_processor: Some(post_processor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post_processor(&self) -> Option<FilePostProcessor> {
        self.post_processor
    }

    fn resolve(&self, index: &str) -> Self {
        Self {
            name: render(&self.name, index),
            post_processor: self.post_processor,
        }
    }
}

/// One program invocation. A simple command is exactly one of these, a group
/// command is an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCommand {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

impl SubCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for the given repetition, with `{index}` substituted.
    pub fn args_for(&self, index: &str) -> Vec<String> {
        self.args.iter().map(|a| render(a, index)).collect()
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    fn to_command_line(&self, index: &str) -> String {
        let mut s = self.program.clone();
        for arg in self.args_for(index) {
            s.push(' ');
            s.push_str(&arg);
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    Simple(SubCommand),
    Group { sub_commands: Vec<SubCommand> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    id: String,
    #[serde(flatten)]
    kind: CommandKind,
    #[serde(default)]
    input_files: Vec<InputFile>,
    #[serde(default)]
    output_files: Vec<OutputFile>,
}

impl Command {
    pub fn simple() -> SimpleCommandBuilder {
        SimpleCommandBuilder::new()
    }

    pub fn group() -> GroupCommandBuilder {
        GroupCommandBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, CommandKind::Group { .. })
    }

    /// Programs to run in order for every repetition.
    pub fn sub_commands(&self) -> &[SubCommand] {
        match &self.kind {
            CommandKind::Simple(cmd) => std::slice::from_ref(cmd),
            CommandKind::Group { sub_commands } => sub_commands,
        }
    }

    pub fn input_files(&self, index: &str) -> Vec<InputFile> {
        self.input_files.iter().map(|f| f.resolve(index)).collect()
    }

    pub fn output_files(&self, index: &str) -> Vec<OutputFile> {
        self.output_files.iter().map(|f| f.resolve(index)).collect()
    }

    /// Human readable command line for one repetition, used in logs.
    pub fn to_command_line(&self, index: &str) -> String {
        match &self.kind {
            CommandKind::Simple(cmd) => cmd.to_command_line(index),
            CommandKind::Group { sub_commands } => {
                let parts: Vec<String> = sub_commands.iter().map(|c| c.to_command_line(index)).collect();
                format!("[{}]", parts.join("; "))
            }
        }
    }

    /// Checks the invariants the builders enforce. Commands loaded through
    /// serde must go through this before being executed.
    pub fn validate(&self) -> Result<(), ComputationError> {
        if self.id.is_empty() {
            return Err(ComputationError::invalid_command("", "command id is empty"));
        }
        if self.id.contains(std::path::MAIN_SEPARATOR) || self.id.contains('/') {
            return Err(ComputationError::invalid_command(
                &self.id,
                "command id is used as a log file name and must not contain a path separator",
            ));
        }
        let sub_commands = self.sub_commands();
        if sub_commands.is_empty() {
            return Err(ComputationError::invalid_command(
                &self.id,
                "group command has no sub-command",
            ));
        }
        if let Some(empty) = sub_commands.iter().position(|c| c.program.trim().is_empty()) {
            return Err(ComputationError::invalid_command(
                &self.id,
                format!("program #{empty} is empty"),
            ));
        }
        for file in &self.input_files {
            file.validate(&self.id)?;
        }
        for file in &self.output_files {
            if file.name.is_empty() {
                return Err(ComputationError::invalid_command(
                    &self.id,
                    "empty output file name",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SimpleCommandBuilder {
    id: Option<String>,
    program: Option<String>,
    args: Vec<String>,
    timeout: Option<Duration>,
    input_files: Vec<InputFile>,
    output_files: Vec<OutputFile>,
}

impl SimpleCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn input_file(mut self, file: InputFile) -> Self {
        self.input_files.push(file);
        self
    }

    pub fn output_file(mut self, file: OutputFile) -> Self {
        self.output_files.push(file);
        self
    }

    pub fn build(self) -> Result<Command, ComputationError> {
        let program = self.program.unwrap_or_default();
        // the id defaults to the program name, like a job run name
        let id = self.id.unwrap_or_else(|| program.clone());
        let mut sub_command = SubCommand::new(program).args(self.args);
        if let Some(timeout) = self.timeout {
            sub_command = sub_command.timeout(timeout);
        }
        let command = Command {
            id,
            kind: CommandKind::Simple(sub_command),
            input_files: self.input_files,
            output_files: self.output_files,
        };
        command.validate()?;
        Ok(command)
    }
}

#[derive(Default)]
pub struct GroupCommandBuilder {
    id: Option<String>,
    sub_commands: Vec<SubCommand>,
    input_files: Vec<InputFile>,
    output_files: Vec<OutputFile>,
}

impl GroupCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn sub_command(mut self, sub_command: SubCommand) -> Self {
        self.sub_commands.push(sub_command);
        self
    }

    pub fn input_file(mut self, file: InputFile) -> Self {
        self.input_files.push(file);
        self
    }

    pub fn output_file(mut self, file: OutputFile) -> Self {
        self.output_files.push(file);
        self
    }

    pub fn build(self) -> Result<Command, ComputationError> {
        let command = Command {
            id: self.id.unwrap_or_default(),
            kind: CommandKind::Group {
                sub_commands: self.sub_commands,
            },
            input_files: self.input_files,
            output_files: self.output_files,
        };
        command.validate()?;
        Ok(command)
    }
}

fn default_execution_count() -> usize {
    1
}

/// A command together with the number of times it has to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExecution {
    command: Command,
    #[serde(default = "default_execution_count")]
    execution_count: usize,
}

impl CommandExecution {
    pub fn new(command: Command, execution_count: usize) -> Result<Self, ComputationError> {
        let execution = Self {
            command,
            execution_count,
        };
        execution.validate()?;
        Ok(execution)
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn execution_count(&self) -> usize {
        self.execution_count
    }

    pub fn indices(&self) -> Range<usize> {
        0..self.execution_count
    }

    pub fn validate(&self) -> Result<(), ComputationError> {
        if self.execution_count == 0 {
            return Err(ComputationError::invalid_command(
                self.command.id(),
                "execution count must be at least 1",
            ));
        }
        self.command.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_command_renders_index() {
        let command = Command::simple()
            .id("solve")
            .program("solver")
            .args(["--case", "case_{index}.xml"])
            .input_file(InputFile::new("case_{index}.xml"))
            .output_file(OutputFile::with_post_processor(
                "result_{index}.txt",
                FilePostProcessor::Gzip,
            ))
            .build()
            .unwrap();

        assert_eq!(
            command.sub_commands()[0].args_for("3"),
            vec!["--case", "case_3.xml"]
        );
        assert_eq!(command.input_files("3")[0].name(), "case_3.xml");
        assert_eq!(command.output_files("0")[0].name(), "result_0.txt");
        assert_eq!(command.to_command_line("1"), "solver --case case_1.xml");
        assert!(!command.is_group());
    }

    #[test]
    fn test_simple_command_id_defaults_to_program() {
        let command = Command::simple().program("echo").build().unwrap();
        assert_eq!(command.id(), "echo");
    }

    #[test]
    fn test_group_command_requires_sub_commands() {
        let err = Command::group().id("grp").build().unwrap_err();
        assert!(err.to_string().contains("no sub-command"));
    }

    #[test]
    fn test_group_command_line() {
        let command = Command::group()
            .id("grp")
            .sub_command(SubCommand::new("a"))
            .sub_command(SubCommand::new("b").arg("x{index}"))
            .build()
            .unwrap();
        assert!(command.is_group());
        assert_eq!(command.to_command_line("2"), "[a; b x2]");
    }

    #[test]
    fn test_gunzip_input_requires_gz_suffix() {
        let err = Command::simple()
            .program("p")
            .input_file(InputFile::with_pre_processor("data.txt", FilePreProcessor::Gunzip))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must end with '.gz'"));

        let err = Command::simple()
            .program("p")
            .input_file(InputFile::with_pre_processor("data.gz", FilePreProcessor::ArchiveUnzip))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must end with '.zip'"));
    }

    #[test]
    fn test_command_id_must_not_be_a_path() {
        let err = Command::simple().id("a/b").program("p").build().unwrap_err();
        assert!(matches!(err, ComputationError::InvalidCommand { .. }));
    }

    #[test]
    fn test_execution_count_must_be_positive() {
        let command = Command::simple().program("p").build().unwrap();
        assert!(CommandExecution::new(command.clone(), 0).is_err());
        let execution = CommandExecution::new(command, 3).unwrap();
        assert_eq!(execution.indices().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_command_execution_from_json() {
        let json = r#"[
            {
                "command": {
                    "id": "conv",
                    "type": "simple",
                    "program": "gzip",
                    "args": ["-k", "in_{index}.txt"],
                    "input_files": [{"name": "in_{index}.txt"}],
                    "output_files": [{"name": "in_{index}.txt.gz"}]
                },
                "execution_count": 2
            },
            {
                "command": {
                    "id": "grp",
                    "type": "group",
                    "sub_commands": [{"program": "true"}, {"program": "false", "timeout_secs": 5}],
                    "input_files": [{"name": "pack.zip", "pre_processor": "archive_unzip"}]
                }
            }
        ]"#;
        let executions: Vec<CommandExecution> = serde_json::from_str(json).unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].execution_count(), 2);
        assert_eq!(executions[1].execution_count(), 1);
        assert!(executions[1].command().is_group());
        assert_eq!(
            executions[1].command().sub_commands()[1].timeout_duration(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            executions[1].command().input_files("0")[0].pre_processor(),
            Some(FilePreProcessor::ArchiveUnzip)
        );
        for execution in &executions {
            execution.validate().unwrap();
        }
    }

    #[test]
    fn test_processor_names_parse() {
        use std::str::FromStr;
        assert_eq!(FilePreProcessor::from_str("gunzip").unwrap(), FilePreProcessor::Gunzip);
        assert_eq!(
            FilePreProcessor::from_str("unzip").unwrap(),
            FilePreProcessor::ArchiveUnzip
        );
        assert_eq!(FilePostProcessor::from_str("gzip").unwrap(), FilePostProcessor::Gzip);
        assert!(FilePostProcessor::from_str("bzip2").is_err());
        assert_eq!(FilePreProcessor::ArchiveUnzip.to_string(), "archive_unzip");
    }
}
