//! Test-only helpers: a fixture template, a seeded in-memory ledger, a temp
//! workspace and a session double.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, bail};

use crate::core::types::{Scope, Template};
use crate::io::init::{InitOptions, WorkspacePaths, init_workspace};
use crate::io::ledger::MemoryLedger;
use crate::io::session::AgentSession;
use crate::phase::{Instance, pour};

/// Three steps in a chain: design, implement, review.
pub const FIXTURE_BODY: &str = "\
Ship a reviewed change for {{feature}}.

## Step: design: Design {{feature}}
Sketch the change.

## Step: implement: Implement {{feature}}
Needs: design
Tier: fast

## Step: review
Needs: implement
";

pub fn fixture_template() -> Template {
    Template {
        id: "mol-review-then-merge".to_string(),
        title: "Review then merge {{feature}}".to_string(),
        description: FIXTURE_BODY.to_string(),
        source: Scope::Builtin,
    }
}

pub fn feature_bindings() -> BTreeMap<String, String> {
    BTreeMap::from([("feature".to_string(), "auth".to_string())])
}

/// A ledger holding one durable instance of [`fixture_template`].
pub fn seeded_ledger() -> (MemoryLedger, Instance) {
    let ledger = MemoryLedger::default();
    let instance = pour(&ledger, &fixture_template(), &feature_bindings()).expect("seed instance");
    (ledger, instance)
}

/// Freshly initialized workspace in a temp directory. Keep the `TempDir` alive
/// for as long as the paths are used.
pub fn temp_workspace() -> (tempfile::TempDir, WorkspacePaths) {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(dir.path(), &InitOptions { force: false }).expect("init workspace");
    (dir, paths)
}

/// Session double recording every injected message.
#[derive(Debug, Default)]
pub struct RecordingSession {
    pub fail: bool,
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingSession {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().expect("session lock").clone()
    }
}

impl AgentSession for RecordingSession {
    fn inject(&self, agent: &str, message: &str) -> Result<()> {
        if self.fail {
            bail!("no session for {agent}");
        }
        self.messages
            .lock()
            .expect("session lock")
            .push((agent.to_string(), message.to_string()));
        Ok(())
    }
}
