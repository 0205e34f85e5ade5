//! Bounded subprocess execution.
//!
//! Every external tool (git, diff, file) runs through `run_tool`, which applies
//! the configured timeout and kills the child if the caller's future is dropped.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{CoreError, Result};

/// Run `cmd`, optionally feeding `input` on stdin.
///
/// A missing binary is `ToolUnavailable`; any other launch failure or a timeout
/// is `ToolExecution`. Exit status is left for the caller to interpret.
pub async fn run_tool(mut cmd: Command, input: Option<&[u8]>, limit: Duration) -> Result<Output> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();

    cmd.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => CoreError::ToolUnavailable(program.clone()),
        _ => CoreError::ToolExecution(format!("{}: {}", program, e)),
    })?;

    let feeder = match (input, child.stdin.take()) {
        (Some(data), Some(mut stdin)) => {
            let data = data.to_vec();
            Some(tokio::spawn(async move {
                // The tool may stop reading early; a broken pipe is expected then.
                let _ = stdin.write_all(&data).await;
            }))
        }
        _ => None,
    };

    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| CoreError::ToolExecution(format!("{} timed out after {:?}", program, limit)))?
        .map_err(|e| CoreError::ToolExecution(format!("{}: {}", program, e)))?;

    if let Some(feeder) = feeder {
        feeder.abort();
    }

    tracing::debug!(tool = %program, status = ?output.status.code(), "tool finished");
    Ok(output)
}

/// What a git subcommand produced. Launch failures never get this far.
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs version-control subcommands against a repository.
#[async_trait]
pub trait ProcessExec: Send + Sync {
    /// Raw result of a subcommand that ran. A tool that could not be started
    /// or did not finish in time is a `RetrievalFailure`.
    async fn output(&self, repo_path: &Path, subcommand: &str, args: &[&str]) -> Result<GitOutput>;

    /// Stdout of a successful subcommand. A non-zero exit, or an empty stdout
    /// with something on stderr, is a `RetrievalFailure`.
    async fn run(&self, repo_path: &Path, subcommand: &str, args: &[&str]) -> Result<Vec<u8>> {
        let output = self.output(repo_path, subcommand, args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.success {
            return Err(CoreError::RetrievalFailure(format!(
                "git {} exited with {}: {}",
                subcommand,
                output.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() && !stderr.trim().is_empty() {
            return Err(CoreError::RetrievalFailure(format!("git {}: {}", subcommand, stderr.trim())));
        }

        Ok(output.stdout)
    }
}

/// `ProcessExec` backed by the git binary
pub struct GitExe {
    binary: PathBuf,
    timeout: Duration,
}

impl GitExe {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProcessExec for GitExe {
    async fn output(&self, repo_path: &Path, subcommand: &str, args: &[&str]) -> Result<GitOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--git-dir").arg(repo_path).arg(subcommand).args(args);

        let output = run_tool(cmd, None, self.timeout).await.map_err(|e| match e {
            CoreError::ToolUnavailable(tool) => CoreError::RetrievalFailure(format!("{} not found", tool)),
            CoreError::ToolExecution(msg) => CoreError::RetrievalFailure(msg),
            other => other,
        })?;

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// True when `program` can be launched. Used to skip tool-dependent tests.
#[cfg(test)]
pub(crate) fn tool_installed(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Executable shell script standing in for an external tool.
#[cfg(all(test, unix))]
pub(crate) fn script_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
