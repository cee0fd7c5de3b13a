//! Ledger seam: the external record store molecule operations run against.
//!
//! The ledger serializes individual writes but offers no transaction across
//! several records. The one conditional write it supports is
//! [`Precondition::AttachmentClear`], used for exclusive hook attachment.

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Attachment, Kind, Record, Status};

pub const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("record {0} not found")]
    NotFound(String),

    #[error("write to {record}.{field} rejected: {reason}")]
    Rejected {
        record: String,
        field: String,
        reason: String,
    },

    #[error("precondition failed on {record}.{field}")]
    PreconditionFailed { record: String, field: String },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Record store with create/update/list/show.
pub trait Ledger {
    fn create(&self, record: NewRecord) -> Result<Record, LedgerError>;
    fn update(&self, id: &str, update: RecordUpdate) -> Result<Record, LedgerError>;
    /// Matching records in creation order.
    fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, LedgerError>;
    fn show(&self, id: &str) -> Result<Record, LedgerError>;
}

/// Fields for a new record. The ledger assigns `id` unless one is given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRecord {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub kind: Kind,
    pub status: Status,
    pub assignee: Option<String>,
    pub parent: Option<String>,
    pub depends_on: Vec<String>,
    pub labels: Vec<String>,
}

impl NewRecord {
    pub fn new(kind: Kind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Conditional-write guard checked atomically with the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Apply only if the record holds no attachment.
    AttachmentClear,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub kind: Option<Kind>,
    pub status: Option<Status>,
    pub assignee: Option<Option<String>>,
    pub depends_on: Option<Vec<String>>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    /// `Some(None)` clears the attachment.
    pub attachment: Option<Option<Attachment>>,
    pub precondition: Option<Precondition>,
}

impl RecordUpdate {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn labels(labels: impl IntoIterator<Item = String>) -> Self {
        Self {
            add_labels: labels.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn depends_on(depends_on: Vec<String>) -> Self {
        Self {
            depends_on: Some(depends_on),
            ..Self::default()
        }
    }

    pub fn attach(attachment: Attachment) -> Self {
        Self {
            attachment: Some(Some(attachment)),
            ..Self::default()
        }
    }

    pub fn detach() -> Self {
        Self {
            attachment: Some(None),
            ..Self::default()
        }
    }

    pub fn when(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }
}

/// Conjunctive list filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub parent: Option<String>,
    pub kind: Option<Kind>,
    pub status: Option<Status>,
    pub assignee: Option<String>,
    pub label: Option<String>,
}

impl ListFilter {
    pub fn children_of(parent: &str) -> Self {
        Self {
            parent: Some(parent.to_string()),
            ..Self::default()
        }
    }

    pub fn kind(kind: Kind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.parent
            .as_deref()
            .is_none_or(|p| record.parent.as_deref() == Some(p))
            && self.kind.is_none_or(|k| record.kind == k)
            && self.status.is_none_or(|s| record.status == s)
            && self
                .assignee
                .as_deref()
                .is_none_or(|a| record.assignee.as_deref() == Some(a))
            && self.label.as_deref().is_none_or(|l| record.has_label(l))
    }
}

/// Whole-ledger document shared by the in-memory and file-backed stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub version: u32,
    pub next_seq: u64,
    pub records: Vec<Record>,
}

impl Default for LedgerDocument {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            next_seq: 1,
            records: Vec::new(),
        }
    }
}

impl LedgerDocument {
    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn show(&self, id: &str) -> Result<Record, LedgerError> {
        self.position(id)
            .map(|idx| self.records[idx].clone())
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    pub fn list(&self, filter: &ListFilter) -> Vec<Record> {
        self.records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn create(&mut self, prefix: &str, new: NewRecord) -> Result<Record, LedgerError> {
        let id = match new.id {
            Some(id) if self.position(&id).is_some() => {
                return Err(LedgerError::Rejected {
                    record: id,
                    field: "id".to_string(),
                    reason: "id already exists".to_string(),
                });
            }
            Some(id) => id,
            None => self.allocate_id(prefix),
        };
        if let Some(parent) = &new.parent {
            self.require_known(&id, "parent", std::slice::from_ref(parent))?;
        }
        self.require_known(&id, "depends_on", &new.depends_on)?;

        let record = Record {
            id,
            title: new.title,
            description: new.description,
            kind: new.kind,
            status: new.status,
            assignee: new.assignee,
            parent: new.parent,
            depends_on: dedup(new.depends_on),
            labels: dedup(new.labels),
            attachment: None,
            created_at: now_rfc3339(),
        };
        self.records.push(record.clone());
        Ok(record)
    }

    pub fn update(&mut self, id: &str, update: RecordUpdate) -> Result<Record, LedgerError> {
        let idx = self
            .position(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        if self.records[idx].kind == Kind::Digest {
            return Err(LedgerError::Rejected {
                record: id.to_string(),
                field: "kind".to_string(),
                reason: "digest records are immutable".to_string(),
            });
        }
        if update.precondition == Some(Precondition::AttachmentClear)
            && self.records[idx].attachment.is_some()
        {
            return Err(LedgerError::PreconditionFailed {
                record: id.to_string(),
                field: "attachment".to_string(),
            });
        }
        if let Some(deps) = &update.depends_on {
            if deps.iter().any(|d| d == id) {
                return Err(LedgerError::Rejected {
                    record: id.to_string(),
                    field: "depends_on".to_string(),
                    reason: "record cannot depend on itself".to_string(),
                });
            }
            self.require_known(id, "depends_on", deps)?;
        }

        let record = &mut self.records[idx];
        if let Some(title) = update.title {
            record.title = title;
        }
        if let Some(description) = update.description {
            record.description = description;
        }
        if let Some(kind) = update.kind {
            record.kind = kind;
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(assignee) = update.assignee {
            record.assignee = assignee;
        }
        if let Some(deps) = update.depends_on {
            record.depends_on = dedup(deps);
        }
        record.labels.retain(|l| !update.remove_labels.contains(l));
        for label in update.add_labels {
            if !record.labels.contains(&label) {
                record.labels.push(label);
            }
        }
        if let Some(attachment) = update.attachment {
            record.attachment = attachment;
        }
        Ok(record.clone())
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        loop {
            let candidate = format!("{prefix}-{}", self.next_seq);
            self.next_seq += 1;
            if self.position(&candidate).is_none() {
                return candidate;
            }
        }
    }

    fn require_known(&self, record: &str, field: &str, ids: &[String]) -> Result<(), LedgerError> {
        match ids.iter().find(|id| self.position(id).is_none()) {
            Some(missing) => Err(LedgerError::Rejected {
                record: record.to_string(),
                field: field.to_string(),
                reason: format!("unknown record {missing}"),
            }),
            None => Ok(()),
        }
    }
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Current UTC time as an RFC 3339 string with second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// In-process ledger guarded by a mutex.
#[derive(Debug)]
pub struct MemoryLedger {
    prefix: String,
    doc: Mutex<LedgerDocument>,
}

impl MemoryLedger {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            doc: Mutex::new(LedgerDocument::default()),
        }
    }

    pub fn snapshot(&self) -> Result<LedgerDocument, LedgerError> {
        self.with_doc(|doc| Ok(doc.clone()))
    }

    fn with_doc<T>(
        &self,
        f: impl FnOnce(&mut LedgerDocument) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut doc = self
            .doc
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;
        f(&mut doc)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new("mol")
    }
}

impl Ledger for MemoryLedger {
    fn create(&self, record: NewRecord) -> Result<Record, LedgerError> {
        self.with_doc(|doc| doc.create(&self.prefix, record))
    }

    fn update(&self, id: &str, update: RecordUpdate) -> Result<Record, LedgerError> {
        self.with_doc(|doc| doc.update(id, update))
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, LedgerError> {
        self.with_doc(|doc| Ok(doc.list(filter)))
    }

    fn show(&self, id: &str) -> Result<Record, LedgerError> {
        self.with_doc(|doc| doc.show(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str) -> NewRecord {
        NewRecord::new(Kind::Task, title)
    }

    #[test]
    fn assigns_sequential_ids_and_lists_in_creation_order() {
        let ledger = MemoryLedger::new("t");
        let a = ledger.create(task("a")).expect("a");
        let b = ledger.create(task("b")).expect("b");
        assert_eq!(a.id, "t-1");
        assert_eq!(b.id, "t-2");
        let titles: Vec<String> = ledger
            .list(&ListFilter::default())
            .expect("list")
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[test]
    fn explicit_ids_are_kept_and_skipped_by_allocation() {
        let ledger = MemoryLedger::new("t");
        let mut explicit = task("root");
        explicit.id = Some("t-1".to_string());
        ledger.create(explicit.clone()).expect("explicit");
        assert_eq!(ledger.create(task("next")).expect("next").id, "t-2");
        assert!(matches!(
            ledger.create(explicit),
            Err(LedgerError::Rejected { .. })
        ));
    }

    #[test]
    fn rejects_unknown_parent_and_dependencies() {
        let ledger = MemoryLedger::default();
        let mut orphan = task("orphan");
        orphan.parent = Some("ghost".to_string());
        assert!(matches!(
            ledger.create(orphan),
            Err(LedgerError::Rejected { field, .. }) if field == "parent"
        ));

        let a = ledger.create(task("a")).expect("a");
        let err = ledger
            .update(&a.id, RecordUpdate::depends_on(vec!["ghost".to_string()]))
            .expect_err("unknown dep");
        assert!(matches!(err, LedgerError::Rejected { field, .. } if field == "depends_on"));
    }

    #[test]
    fn attachment_precondition_blocks_second_attach() {
        let ledger = MemoryLedger::default();
        let hook = ledger.create(NewRecord::new(Kind::Hook, "hook")).expect("hook");
        let attachment = Attachment {
            instance_id: "mol-9".to_string(),
            attached_at: now_rfc3339(),
        };
        ledger
            .update(
                &hook.id,
                RecordUpdate::attach(attachment.clone()).when(Precondition::AttachmentClear),
            )
            .expect("first attach");
        let err = ledger
            .update(
                &hook.id,
                RecordUpdate::attach(attachment).when(Precondition::AttachmentClear),
            )
            .expect_err("second attach");
        assert!(matches!(err, LedgerError::PreconditionFailed { .. }));
    }

    #[test]
    fn digest_records_are_immutable() {
        let ledger = MemoryLedger::default();
        let digest = ledger
            .create(NewRecord::new(Kind::Digest, "Digest: x"))
            .expect("digest");
        assert!(
            ledger
                .update(&digest.id, RecordUpdate::status(Status::Open))
                .is_err()
        );
    }

    #[test]
    fn filters_compose() {
        let ledger = MemoryLedger::default();
        let root = ledger.create(NewRecord::new(Kind::Epic, "root")).expect("root");
        let mut child = task("child");
        child.parent = Some(root.id.clone());
        child.labels = vec!["tier:fast".to_string(), "tier:fast".to_string()];
        let child = ledger.create(child).expect("child");
        assert_eq!(child.labels, vec!["tier:fast"]);

        let filter = ListFilter {
            label: Some("tier:fast".to_string()),
            ..ListFilter::children_of(&root.id)
        };
        assert_eq!(ledger.list(&filter).expect("list").len(), 1);
        assert!(
            ledger
                .list(&ListFilter::kind(Kind::Digest))
                .expect("list")
                .is_empty()
        );
    }
}
