//! Subprocess execution for the `git` binary.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Result of one subprocess invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

impl CommandOutput {
    /// Successful output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// Failed output.
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Runs git with the given arguments.
///
/// `cwd` of `None` runs in the process working directory.
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Run `git <args>` and capture its output.
    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> std::io::Result<CommandOutput>;
}

/// Runs the real `git` executable.
#[derive(Debug, Clone)]
pub struct GitProcess {
    binary: PathBuf,
}

impl Default for GitProcess {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

impl GitProcess {
    /// Use a specific git executable.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for GitProcess {
    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> std::io::Result<CommandOutput> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            output: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let runner = GitProcess::with_binary("/nonexistent/bin/git");
        assert!(runner.run(None, &["--version"]).await.is_err());
    }
}
