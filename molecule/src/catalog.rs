//! Catalog loader: merges template scopes with later-wins-by-id semantics.
//!
//! Scope order: builtin, town, rig, project, live ledger. A later scope replaces
//! the whole template of an earlier one; fields are never merged.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, instrument};

use crate::core::types::{Kind, Scope, Template};
use crate::error::{MolError, Stage};
use crate::io::catalog::{builtin_templates, read_scope_file};
use crate::io::init::scope_catalog_path;
use crate::io::ledger::{Ledger, ListFilter};

/// Prefix tried when an id does not resolve as given.
pub const TEMPLATE_ID_PREFIX: &str = "mol-";

/// Filesystem roots for the optional scopes.
#[derive(Debug, Clone, Default)]
pub struct CatalogSources {
    pub town_root: Option<PathBuf>,
    pub rig_root: Option<PathBuf>,
    pub project_root: Option<PathBuf>,
}

/// Merged, read-only view of every visible template.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    templates: BTreeMap<String, Template>,
}

impl Catalog {
    /// Load all scopes. The ledger scope is a read-only query for template records.
    #[instrument(skip_all)]
    pub fn load<L: Ledger>(sources: &CatalogSources, ledger: Option<&L>) -> Result<Self, MolError> {
        let mut catalog = Catalog::default();
        catalog.merge(builtin_templates().map_err(catalog_error)?);

        let file_scopes = [
            (Scope::Town, &sources.town_root),
            (Scope::Rig, &sources.rig_root),
            (Scope::Project, &sources.project_root),
        ];
        for (scope, root) in file_scopes {
            let Some(root) = root else { continue };
            let templates =
                read_scope_file(&scope_catalog_path(root), scope).map_err(catalog_error)?;
            catalog.merge(templates);
        }

        if let Some(ledger) = ledger {
            let records = ledger
                .list(&ListFilter::kind(Kind::Template))
                .map_err(MolError::ledger(Stage::Catalog))?;
            catalog.merge(records.iter().map(Template::from_record));
        }

        debug!(templates = catalog.templates.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        let mut catalog = Catalog::default();
        catalog.merge(templates);
        catalog
    }

    fn merge(&mut self, templates: impl IntoIterator<Item = Template>) {
        for template in templates {
            self.templates.insert(template.id.clone(), template);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Exact id first, then the `mol-` prefixed form.
    pub fn resolve(&self, id: &str) -> Option<&Template> {
        self.get(id).or_else(|| {
            if id.starts_with(TEMPLATE_ID_PREFIX) {
                None
            } else {
                self.get(&format!("{TEMPLATE_ID_PREFIX}{id}"))
            }
        })
    }

    pub fn require(&self, id: &str) -> Result<&Template, MolError> {
        self.resolve(id)
            .ok_or_else(|| MolError::template_not_found(id))
    }

    /// Templates sorted by id.
    pub fn list(&self) -> Vec<&Template> {
        self.templates.values().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn catalog_error(err: anyhow::Error) -> MolError {
    MolError::Catalog(format!("{err:#}"))
}
