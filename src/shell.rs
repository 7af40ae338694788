//! `sh -c` 命令执行器 - 供重载与权重推送钩子共用

use std::io;

use log::debug;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("`{command}` exited with {status}: {stderr}")]
    Status {
        command: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    command: String,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.command
    }

    /// 将每个 `{key}` 占位符替换为对应值
    pub fn substitute(&self, pairs: &[(&str, &str)]) -> Self {
        let command = pairs.iter().fold(self.command.clone(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        });
        Self { command }
    }

    /// 执行命令并返回去除首尾空白的标准输出
    pub async fn run(&self) -> Result<String, CommandError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Status {
                command: self.command.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("Executed `{}`. Output: '{}'", self.command, stdout);
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_placeholders() {
        let cmd = ShellCommand::new("echo 'set weight web/{name} {weight}'");
        let cmd = cmd.substitute(&[("name", "web2"), ("weight", "128")]);
        assert_eq!(cmd.as_str(), "echo 'set weight web/web2 128'");
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = ShellCommand::new("echo reloaded").run().await.unwrap();
        assert_eq!(out, "reloaded");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let err = ShellCommand::new("echo boom >&2; exit 3").run().await.unwrap_err();
        match err {
            CommandError::Status { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
