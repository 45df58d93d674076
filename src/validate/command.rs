//! Child process execution with a deadline.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// A command that could not be run to completion.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("command line is empty")]
    Empty,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// The child was killed after exceeding its deadline.
    #[error("{program} timed out after {}ms", .timeout.as_millis())]
    TimedOut { program: String, timeout: Duration },
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Best available explanation of a failed run: stderr, then stdout, then
    /// the exit status.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status.code() {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Run `argv` and wait for it, killing the child if `limit` elapses.
pub async fn run_command(argv: &[String], limit: Duration) -> Result<CommandOutput, CommandError> {
    let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CommandError::Spawn {
            program: program.clone(),
            source: Arc::new(e),
        })?;

    tracing::debug!(program = %program, args = ?args, "Spawned command");

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(CommandError::Wait {
            program: program.clone(),
            source: Arc::new(e),
        }),
        Err(_) => {
            tracing::warn!(program = %program, timeout_ms = limit.as_millis() as u64, "Command timed out");
            Err(CommandError::TimedOut {
                program: program.clone(),
                timeout: limit,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_failure_output() {
        let output = run_command(&argv(&["sh", "-c", "echo broken >&2; exit 3"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.status.success());
        assert_eq!(output.diagnostic(), "broken");
    }

    #[tokio::test]
    async fn test_exit_code_when_silent() {
        let output = run_command(&argv(&["sh", "-c", "exit 2"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.diagnostic(), "exited with code 2");
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = run_command(&argv(&["sleep", "5"]), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_and_empty() {
        let err = run_command(&argv(&["/nonexistent/host-sync-binary"]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));

        let err = run_command(&[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CommandError::Empty));
    }
}
