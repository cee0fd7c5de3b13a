//! File-backed ledger: one JSON document, schema-validated on load and
//! rewritten atomically on every write.
//!
//! There is no cross-process lock. Two processes writing at once can lose an
//! update; the ledger only promises that each individual write is whole.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::debug;

use crate::core::types::Record;
use crate::io::ledger::{
    Ledger, LedgerDocument, LedgerError, ListFilter, NewRecord, RecordUpdate,
};

pub const LEDGER_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/ledger/v1.schema.json"
));

pub struct JsonLedger {
    path: PathBuf,
    prefix: String,
    validator: Validator,
    // Serializes load-modify-save within this process.
    write_lock: Mutex<()>,
}

impl JsonLedger {
    pub fn open(path: &Path, prefix: &str) -> Result<Self> {
        let schema: Value = serde_json::from_str(LEDGER_SCHEMA).context("parse ledger schema")?;
        let validator =
            validator_for(&schema).map_err(|err| anyhow!("invalid ledger schema: {}", err))?;
        Ok(Self {
            path: path.to_path_buf(),
            prefix: prefix.to_string(),
            validator,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; a missing file is an empty ledger.
    pub fn load(&self) -> Result<LedgerDocument> {
        if !self.path.exists() {
            return Ok(LedgerDocument::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse ledger {}", self.path.display()))?;
        if !self.validator.is_valid(&value) {
            let messages = self
                .validator
                .iter_errors(&value)
                .map(|err| err.to_string())
                .collect::<Vec<_>>();
            return Err(anyhow!(
                "ledger schema validation failed for {}: {}",
                self.path.display(),
                messages.join("; ")
            ));
        }
        serde_json::from_value(value)
            .with_context(|| format!("deserialize ledger {}", self.path.display()))
    }

    pub fn save(&self, doc: &LedgerDocument) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(doc).context("serialize ledger")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerDocument) -> Result<T, LedgerError>) -> Result<T, LedgerError> {
        let doc = self.load().map_err(unavailable)?;
        f(&doc)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut LedgerDocument) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;
        let mut doc = self.load().map_err(unavailable)?;
        let out = f(&mut doc)?;
        self.save(&doc).map_err(unavailable)?;
        Ok(out)
    }
}

fn unavailable(err: anyhow::Error) -> LedgerError {
    LedgerError::Unavailable(format!("{err:#}"))
}

impl Ledger for JsonLedger {
    fn create(&self, record: NewRecord) -> Result<Record, LedgerError> {
        let created = self.write(|doc| doc.create(&self.prefix, record))?;
        debug!(id = %created.id, kind = %created.kind, "ledger create");
        Ok(created)
    }

    fn update(&self, id: &str, update: RecordUpdate) -> Result<Record, LedgerError> {
        let updated = self.write(|doc| doc.update(id, update))?;
        debug!(id, "ledger update");
        Ok(updated)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, LedgerError> {
        self.read(|doc| Ok(doc.list(filter)))
    }

    fn show(&self, id: &str) -> Result<Record, LedgerError> {
        self.read(|doc| doc.show(id))
    }
}

/// Write via a sibling temp file and rename so readers never see a torn file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
