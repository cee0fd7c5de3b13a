//! Shared deterministic types for molecule core logic.
//!
//! These types define stable contracts between core components and the ledger
//! seam. They carry no I/O and serialize to the same shape the ledger stores.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a ledger record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Closed,
    Blocked,
    Pinned,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Closed => "closed",
            Status::Blocked => "blocked",
            Status::Pinned => "pinned",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a ledger record represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    #[default]
    Task,
    Epic,
    Template,
    Digest,
    Hook,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Task => "task",
            Kind::Epic => "epic",
            Kind::Template => "template",
            Kind::Digest => "digest",
            Kind::Hook => "hook",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance phase. Templates are the third (solid) phase and never live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Liquid: persistent, audit-preserving.
    Durable,
    /// Vapor: transient, no audit requirement.
    Ephemeral,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Durable => "durable",
            Phase::Ephemeral => "ephemeral",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a template definition came from. Ordered from lowest to highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Builtin,
    Town,
    Rig,
    Project,
    Ledger,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Builtin => "builtin",
            Scope::Town => "town",
            Scope::Rig => "rig",
            Scope::Project => "project",
            Scope::Ledger => "ledger",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attached-instance fields on a hook record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub instance_id: String,
    pub attached_at: String,
}

/// Generic ledger unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: Kind,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub created_at: String,
}

impl Record {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Value of the first `prefix:value` label, if any.
    pub fn label_value(&self, prefix: &str) -> Option<&str> {
        self.labels.iter().find_map(|label| {
            label
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.status == Status::Closed
    }
}

/// Immutable workflow definition (solid phase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub title: String,
    /// Raw body: preamble, step declarations and `{{var}}` placeholders.
    pub description: String,
    pub source: Scope,
}

impl Template {
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            source: Scope::Ledger,
        }
    }
}

/// One declared unit of work, parsed from a template body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "ref")]
    pub step_ref: String,
    pub title: String,
    pub instructions: String,
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Wait for every child bonded under the running instance.
    #[serde(default)]
    pub waits_for_children: bool,
}

impl Step {
    pub fn new(step_ref: &str) -> Self {
        Self {
            step_ref: step_ref.to_string(),
            title: step_ref.to_string(),
            instructions: String::new(),
            needs: Vec::new(),
            tier: None,
            waits_for_children: false,
        }
    }
}

/// Fan-in join state for a step waiting on dynamically bonded children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStatus {
    pub step_id: String,
    pub expected: usize,
    pub completed: usize,
}

/// Derived progress of an instance. Recomputed on every call, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub root_id: String,
    pub root_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub total_steps: usize,
    pub done_steps: usize,
    pub in_progress_steps: usize,
    pub ready_steps: Vec<String>,
    pub blocked_steps: Vec<String>,
    pub percent_complete: usize,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<JoinStatus>,
}
