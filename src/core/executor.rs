use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

/// Exit code recorded when a program outlives its timeout, as coreutils `timeout` does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// One shell invocation of one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command_line: String,
    pub working_dir: PathBuf,
    /// Receives stdout and stderr, opened in append mode.
    pub log_file: PathBuf,
    pub timeout: Option<Duration>,
}

/// Runs a command line and reports its exit code.
///
/// Errors are reserved for failures to start or wait on the process; a
/// program that runs and fails is an `Ok` with a nonzero code.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<i32>;
}

/// Runs invocations through `sh -c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExecutor;

#[async_trait]
impl ProcessExecutor for ShellExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<i32> {
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&invocation.log_file)
            .await
            .with_context(|| format!("Failed to open log file {}", invocation.log_file.display()))?
            .into_std()
            .await;
        let stderr = log
            .try_clone()
            .with_context(|| format!("Failed to share log file {}", invocation.log_file.display()))?;

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&invocation.command_line)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", invocation.command_line))?;

        let status = match invocation.timeout {
            None => child.wait().await,
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(
                        "'{}' exceeded its timeout of {}s, killing it",
                        invocation.command_line,
                        limit.as_secs()
                    );
                    child
                        .kill()
                        .await
                        .with_context(|| format!("Failed to kill '{}'", invocation.command_line))?;
                    return Ok(TIMEOUT_EXIT_CODE);
                }
            },
        }
        .with_context(|| format!("Failed to wait for '{}'", invocation.command_line))?;

        Ok(exit_code(status))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn invocation(dir: &std::path::Path, command_line: &str) -> Invocation {
        Invocation {
            command_line: command_line.to_string(),
            working_dir: dir.to_path_buf(),
            log_file: dir.join("cmd_0.out"),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_exit_codes_are_reported() {
        let dir = tempdir().unwrap();
        let executor = ShellExecutor;
        assert_eq!(executor.execute(&invocation(dir.path(), "true")).await.unwrap(), 0);
        assert_eq!(executor.execute(&invocation(dir.path(), "exit 3")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_output_is_appended_to_log() {
        let dir = tempdir().unwrap();
        let executor = ShellExecutor;
        executor
            .execute(&invocation(dir.path(), "echo first; echo oops >&2"))
            .await
            .unwrap();
        executor
            .execute(&invocation(dir.path(), "echo second"))
            .await
            .unwrap();

        let log = std::fs::read_to_string(dir.path().join("cmd_0.out")).unwrap();
        assert!(log.contains("first"));
        assert!(log.contains("oops"));
        assert!(log.ends_with("second\n"));
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempdir().unwrap();
        ShellExecutor
            .execute(&invocation(dir.path(), "touch created_here"))
            .await
            .unwrap();
        assert!(dir.path().join("created_here").exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_program() {
        let dir = tempdir().unwrap();
        let mut slow = invocation(dir.path(), "sleep 5");
        slow.timeout = Some(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let code = ShellExecutor.execute(&slow).await.unwrap();
        assert_eq!(code, TIMEOUT_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let mut broken = invocation(dir.path(), "true");
        broken.working_dir = dir.path().join("missing");
        assert!(ShellExecutor.execute(&broken).await.is_err());
    }
}
