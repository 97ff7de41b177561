use crate::cli::BatchArgs;
use anyhow::{Context, Result};
use gexec::config::Config;
use gexec::core::command::CommandExecution;
use std::path::Path;
use std::process::ExitCode;

pub(crate) async fn handle_batch(config: &Config, args: BatchArgs) -> Result<ExitCode> {
    let executions = read_executions(&args.file)?;
    if executions.is_empty() {
        tracing::warn!("{} contains no command execution", args.file.display());
        return Ok(ExitCode::SUCCESS);
    }
    super::submit(config, executions, args.job).await
}

fn read_executions(path: &Path) -> Result<Vec<CommandExecution>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let executions: Vec<CommandExecution> = if is_yaml {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    };

    for execution in &executions {
        execution.validate()?;
    }
    Ok(executions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_yaml_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.yaml");
        std::fs::write(
            &path,
            r#"
- command:
    id: unpack
    type: simple
    program: ls
    input_files:
      - name: bundle.zip
        pre_processor: archive_unzip
- command:
    id: steps
    type: group
    sub_commands:
      - program: "true"
      - program: echo
        args: ["{index}"]
    output_files:
      - name: out.txt
        post_processor: gzip
  execution_count: 3
"#,
        )
        .unwrap();

        let executions = read_executions(&path).unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].execution_count(), 1);
        assert!(executions[1].command().is_group());
        assert_eq!(executions[1].execution_count(), 3);
    }

    #[test]
    fn test_invalid_batch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"[{"command": {"id": "bad", "type": "simple", "program": "p",
                "input_files": [{"name": "data.txt", "pre_processor": "gunzip"}]}}]"#,
        )
        .unwrap();
        assert!(read_executions(&path).is_err());
        assert!(read_executions(&dir.path().join("missing.json")).is_err());
    }
}
