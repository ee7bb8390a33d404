use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::TerminalConfig;

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux session '{0}' not found")]
    SessionNotFound(String),
    #[error("failed to run tmux: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tmux {command} exited with {status}: {stderr}")]
    CommandFailed {
        command: &'static str,
        status: String,
        stderr: String,
    },
    #[error("tmux {command} timed out after {timeout:?}")]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },
}

/// The externally managed terminal session the bridge types into.
#[async_trait]
pub trait Terminal: Send + Sync {
    fn session_name(&self) -> &str;

    async fn session_exists(&self) -> bool;

    /// Type `text` literally, then press Enter.
    async fn send_keys(&self, text: &str) -> Result<(), TmuxError>;

    /// Send the configured cancel key.
    async fn interrupt(&self) -> Result<(), TmuxError>;
}

/// `Terminal` implemented by shelling out to `tmux`.
pub struct TmuxTerminal {
    session: String,
    socket: Option<PathBuf>,
    interrupt_key: String,
    timeout: Duration,
}

impl TmuxTerminal {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            session: config.session.clone(),
            socket: config.socket.clone(),
            interrupt_key: config.interrupt_key.clone(),
            timeout: config.command_timeout(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(socket) = &self.socket {
            args.push("-S".to_string());
            args.push(socket.to_string_lossy().into_owned());
        }
        args
    }

    /// Arguments for `tmux send-keys`; `literal` adds `-l` so key names in
    /// `keys` are typed rather than interpreted, and `--` so leading dashes
    /// are not read as flags.
    fn send_keys_args(&self, keys: &str, literal: bool) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["send-keys".to_string(), "-t".to_string(), self.session.clone()]);
        if literal {
            args.push("-l".to_string());
            args.push("--".to_string());
        }
        args.push(keys.to_string());
        args
    }

    async fn run(&self, command: &'static str, args: Vec<String>) -> Result<(), TmuxError> {
        debug!(command, session = %self.session, "tmux");
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("tmux").args(&args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| TmuxError::Timeout {
            command,
            timeout: self.timeout,
        })??;

        if output.status.success() {
            Ok(())
        } else {
            Err(TmuxError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn ensure_session(&self) -> Result<(), TmuxError> {
        if self.session_exists().await {
            Ok(())
        } else {
            Err(TmuxError::SessionNotFound(self.session.clone()))
        }
    }
}

#[async_trait]
impl Terminal for TmuxTerminal {
    fn session_name(&self) -> &str {
        &self.session
    }

    async fn session_exists(&self) -> bool {
        let mut args = self.base_args();
        args.extend(["has-session".to_string(), "-t".to_string(), self.session.clone()]);
        self.run("has-session", args).await.is_ok()
    }

    async fn send_keys(&self, text: &str) -> Result<(), TmuxError> {
        self.ensure_session().await?;
        self.run("send-keys", self.send_keys_args(text, true)).await?;
        self.run("send-keys", self.send_keys_args("Enter", false))
            .await
    }

    async fn interrupt(&self) -> Result<(), TmuxError> {
        self.ensure_session().await?;
        self.run("send-keys", self.send_keys_args(&self.interrupt_key, false))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(socket: Option<&str>) -> TmuxTerminal {
        let mut config = TerminalConfig::default();
        config.session = "work".to_string();
        config.socket = socket.map(PathBuf::from);
        TmuxTerminal::new(&config)
    }

    #[test]
    fn test_literal_send_keys_args() {
        let t = terminal(None);
        assert_eq!(
            t.send_keys_args("hello -t x", true),
            vec!["send-keys", "-t", "work", "-l", "--", "hello -t x"]
        );
    }

    #[test]
    fn test_literal_text_starting_with_dash() {
        let t = terminal(None);
        assert_eq!(
            t.send_keys_args("- fix this bullet", true),
            vec!["send-keys", "-t", "work", "-l", "--", "- fix this bullet"]
        );
        assert_eq!(
            t.send_keys_args("-R", true).last().map(String::as_str),
            Some("-R")
        );
        assert_eq!(t.send_keys_args("-R", true)[4], "--");
    }
    #[test]
    fn test_key_name_args_with_socket() {
        let t = terminal(Some("/tmp/tmux.sock"));
        assert_eq!(
            t.send_keys_args("Escape", false),
            vec!["-S", "/tmp/tmux.sock", "send-keys", "-t", "work", "Escape"]
        );
    }

    #[test]
    fn test_error_messages() {
        let err = TmuxError::SessionNotFound("claude".to_string());
        assert_eq!(err.to_string(), "tmux session 'claude' not found");
        let err = TmuxError::Timeout {
            command: "send-keys",
            timeout: Duration::from_millis(5),
        };
        assert!(err.to_string().contains("timed out"));
    }
}
