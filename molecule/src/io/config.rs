//! Workspace configuration stored under `.mol/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::ledger_store::write_atomic;

/// Molecule configuration (TOML).
///
/// Edited by humans, read by automation. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MolConfig {
    /// Prefix for ledger-assigned record ids (`<prefix>-<n>`).
    pub id_prefix: String,

    /// Root of the town-wide catalog scope (`<town_root>/.mol/molecules.jsonl`).
    pub town_root: Option<PathBuf>,

    /// Root of the rig catalog scope (`<rig_root>/.mol/molecules.jsonl`).
    pub rig_root: Option<PathBuf>,

    /// Agent used when a command is not given one explicitly.
    pub default_agent: Option<String>,

    /// Close and label ephemeral children as discarded on squash.
    pub discard_ephemeral_children: bool,

    pub session: SessionConfig,
}

/// How to notify an agent session after work is slung onto its hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,

    /// Argv template; `{session}` and `{message}` are substituted per call.
    pub command: Vec<String>,

    /// Session name is `<session_prefix><agent>`.
    pub session_prefix: String,

    pub timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: ["tmux", "send-keys", "-t", "{session}", "{message}", "Enter"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            session_prefix: String::new(),
            timeout_secs: 10,
        }
    }
}

impl Default for MolConfig {
    fn default() -> Self {
        Self {
            id_prefix: "mol".to_string(),
            town_root: None,
            rig_root: None,
            default_agent: None,
            discard_ephemeral_children: true,
            session: SessionConfig::default(),
        }
    }
}

impl MolConfig {
    pub fn validate(&self) -> Result<()> {
        let prefix = self.id_prefix.trim();
        if prefix.is_empty() {
            return Err(anyhow!("id_prefix must be non-empty"));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!(
                "id_prefix must be ascii alphanumeric, '-' or '_' (got {prefix:?})"
            ));
        }
        if self
            .default_agent
            .as_deref()
            .is_some_and(|a| a.trim().is_empty())
        {
            return Err(anyhow!("default_agent must be non-empty when set"));
        }
        if self.session.timeout_secs == 0 {
            return Err(anyhow!("session.timeout_secs must be > 0"));
        }
        if self.session.command.is_empty() || self.session.command[0].trim().is_empty() {
            return Err(anyhow!("session.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MolConfig::default()`.
pub fn load_config(path: &Path) -> Result<MolConfig> {
    if !path.exists() {
        let cfg = MolConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MolConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MolConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
