//! Catalog scope files: JSONL template definitions, one per line.
//!
//! ```text
//! {"id": "mol-quick-fix", "title": "Quick fix", "description": "## Step: ..."}
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{Scope, Template};
use crate::io::ledger_store::write_atomic;

const BUILTIN_JSONL: &str = include_str!("builtin/molecules.jsonl");

/// On-disk shape of one catalog line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CatalogLine {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
}

impl CatalogLine {
    fn into_template(self, source: Scope) -> Template {
        Template {
            id: self.id,
            title: self.title,
            description: self.description,
            source,
        }
    }

    fn from_template(template: &Template) -> Self {
        Self {
            id: template.id.clone(),
            title: template.title.clone(),
            description: template.description.clone(),
        }
    }
}

/// Templates embedded in the binary.
pub fn builtin_templates() -> Result<Vec<Template>> {
    parse_jsonl(BUILTIN_JSONL, "<builtin>", Scope::Builtin)
}

/// Read one scope file. A missing file is an empty scope.
pub fn read_scope_file(path: &Path, scope: Scope) -> Result<Vec<Template>> {
    if !path.exists() {
        debug!(path = %path.display(), %scope, "catalog scope absent");
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read catalog {}", path.display()))?;
    parse_jsonl(&contents, &path.display().to_string(), scope)
}

/// Parse JSONL catalog text. Blank lines are skipped; a malformed line fails with
/// `origin:line`.
pub fn parse_jsonl(contents: &str, origin: &str, scope: Scope) -> Result<Vec<Template>> {
    let mut templates = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: CatalogLine = serde_json::from_str(line)
            .with_context(|| format!("{origin}:{}: malformed catalog entry", idx + 1))?;
        if entry.id.trim().is_empty() {
            return Err(anyhow!("{origin}:{}: catalog entry has empty id", idx + 1));
        }
        templates.push(entry.into_template(scope));
    }
    Ok(templates)
}

/// Write templates as JSONL, replacing the file.
pub fn write_jsonl(path: &Path, templates: &[Template]) -> Result<()> {
    let mut buf = String::new();
    for template in templates {
        let line = serde_json::to_string(&CatalogLine::from_template(template))
            .with_context(|| format!("serialize template {}", template.id))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

/// Insert or replace one template in a scope file, keeping file order.
pub fn upsert_template(path: &Path, scope: Scope, template: &Template) -> Result<()> {
    let mut templates = read_scope_file(path, scope)?;
    match templates.iter_mut().find(|t| t.id == template.id) {
        Some(existing) => *existing = template.clone(),
        None => templates.push(template.clone()),
    }
    write_jsonl(path, &templates)
}
