//! Workspace layout and `.mol/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{MolConfig, write_config};
use crate::io::ledger::LedgerDocument;
use crate::io::ledger_store::write_atomic;

pub const MOL_DIR: &str = ".mol";
pub const CATALOG_FILE: &str = "molecules.jsonl";

/// All canonical paths within `.mol/` for a workspace root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub mol_dir: PathBuf,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
    pub catalog_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mol_dir = root.join(MOL_DIR);
        Self {
            root: root.clone(),
            mol_dir: mol_dir.clone(),
            config_path: mol_dir.join("config.toml"),
            ledger_path: mol_dir.join("ledger.json"),
            catalog_path: scope_catalog_path(&root),
            gitignore_path: mol_dir.join(".gitignore"),
        }
    }
}

/// Catalog file for a scope root (town, rig or project).
pub fn scope_catalog_path(root: &Path) -> PathBuf {
    root.join(MOL_DIR).join(CATALOG_FILE)
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Rewrite the config even if `.mol/` already exists.
    pub force: bool,
}

/// Create `.mol/` scaffolding in `root`.
///
/// Fails if `.mol/` already exists unless `options.force` is set. Forcing rewrites
/// the config and creates any missing file; an existing ledger or project catalog
/// is left alone since it holds records.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.mol_dir.exists() && !paths.mol_dir.is_dir() {
        return Err(anyhow!("mol init: .mol exists but is not a directory"));
    }
    if paths.mol_dir.exists() && !options.force {
        return Err(anyhow!(
            "mol init: .mol already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.mol_dir)
        .with_context(|| format!("create directory {}", paths.mol_dir.display()))?;
    write_config(&paths.config_path, &MolConfig::default())?;
    write_atomic(&paths.gitignore_path, MOL_GITIGNORE)?;
    if !paths.ledger_path.exists() {
        let mut buf = serde_json::to_string_pretty(&LedgerDocument::default())?;
        buf.push('\n');
        write_atomic(&paths.ledger_path, &buf)?;
    }
    if !paths.catalog_path.exists() {
        write_atomic(&paths.catalog_path, "")?;
    }

    info!(root = %root.display(), "initialized workspace");
    Ok(paths)
}

const MOL_GITIGNORE: &str = "*.tmp\n";

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies init creates config, ledger and catalog under `.mol/`.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.mol_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.ledger_path.is_file());
        assert!(paths.catalog_path.is_file());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            MOL_GITIGNORE
        );
        let doc: LedgerDocument =
            serde_json::from_str(&fs::read_to_string(&paths.ledger_path).expect("read"))
                .expect("parse ledger");
        assert!(doc.records.is_empty());
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Forcing rewrites the config but keeps ledger contents.
    #[test]
    fn init_with_force_keeps_ledger() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "id_prefix = \"x\"\n").expect("write config");
        fs::write(&paths.ledger_path, "keep").expect("write ledger");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert!(
            fs::read_to_string(&paths.config_path)
                .expect("read")
                .contains("id_prefix = \"mol\"")
        );
        assert_eq!(fs::read_to_string(&paths.ledger_path).expect("read"), "keep");
    }
}
