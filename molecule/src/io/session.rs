//! Notify-only agent session seam.
//!
//! Molecule never owns agent sessions. After work lands on a hook it injects one
//! message into the agent's session so the agent notices; nothing else.

use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, instrument};

use crate::io::config::SessionConfig;
use crate::io::process::run_argv;

const SESSION_OUTPUT_LIMIT: usize = 16 * 1024;

/// Deliver a message to a running agent session.
pub trait AgentSession {
    fn inject(&self, agent: &str, message: &str) -> Result<()>;
}

/// Session notifier that runs a configured argv template.
#[derive(Debug, Clone)]
pub struct CommandSession {
    config: SessionConfig,
}

impl CommandSession {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn session_name(&self, agent: &str) -> String {
        format!("{}{agent}", self.config.session_prefix)
    }

    /// The argv that would be run for `agent` and `message`.
    pub fn argv(&self, agent: &str, message: &str) -> Vec<String> {
        let session = self.session_name(agent);
        self.config
            .command
            .iter()
            .map(|arg| arg.replace("{session}", &session).replace("{message}", message))
            .collect()
    }
}

impl AgentSession for CommandSession {
    #[instrument(skip_all, fields(agent = %agent))]
    fn inject(&self, agent: &str, message: &str) -> Result<()> {
        if !self.config.enabled {
            debug!("session notification disabled");
            return Ok(());
        }
        let argv = self.argv(agent, message);
        let output = run_argv(
            &argv,
            Duration::from_secs(self.config.timeout_secs),
            SESSION_OUTPUT_LIMIT,
        )?;
        if output.timed_out {
            bail!("session notify timed out after {}s", self.config.timeout_secs);
        }
        if !output.status.success() {
            bail!(
                "session notify exited with {:?}: {}",
                output.status.code(),
                output.stderr_text()
            );
        }
        debug!("session notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &[&str]) -> SessionConfig {
        SessionConfig {
            command: command.iter().map(|c| c.to_string()).collect(),
            session_prefix: "gt-".to_string(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn argv_substitutes_session_and_message() {
        let session = CommandSession::new(SessionConfig {
            session_prefix: "gt-".to_string(),
            ..SessionConfig::default()
        });
        assert_eq!(
            session.argv("alice", "work on mol-3"),
            vec!["tmux", "send-keys", "-t", "gt-alice", "work on mol-3", "Enter"]
        );
    }

    #[test]
    fn disabled_session_is_a_no_op() {
        let session = CommandSession::new(SessionConfig {
            enabled: false,
            ..config(&["definitely-not-a-real-binary"])
        });
        session.inject("alice", "hi").expect("disabled");
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_reported() {
        let session = CommandSession::new(config(&["sh", "-c", "echo nope >&2; exit 3"]));
        let err = session.inject("alice", "hi").expect_err("fails");
        assert!(err.to_string().contains("nope"));
    }
}
