//! Command surface over one workspace. Each method backs one `mol` subcommand
//! and returns a serializable report; rendering is left to the caller.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::catalog::{Catalog, CatalogSources};
use crate::core::graph::validate_steps;
use crate::core::provenance::template_of;
use crate::core::steps::parse_steps;
use crate::core::types::{Attachment, Phase, ProgressReport, Record, Scope, Step, Template};
use crate::error::{MolError, Stage};
use crate::hook::{self, AttachReport, DetachOutcome, StatusReport};
use crate::instantiate::instantiate;
use crate::io::catalog::{builtin_templates, upsert_template, write_jsonl};
use crate::io::config::{MolConfig, load_config};
use crate::io::init::WorkspacePaths;
use crate::io::ledger::{Ledger, ListFilter};
use crate::io::ledger_store::JsonLedger;
use crate::io::render::render_notify;
use crate::io::session::AgentSession;
use crate::phase::{
    self, BondOptions, BondOutcome, BurnOutcome, DistillOptions, Instance, SquashOptions,
    SquashOutcome,
};
use crate::progress::{self, InstanceSummary};

/// Which templates `list` shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListScope {
    #[default]
    All,
    /// File and builtin scopes only.
    Catalog,
    /// Template records in the ledger only.
    Db,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub title: String,
    pub source: Scope,
    pub steps: usize,
}

impl TemplateSummary {
    fn of(template: &Template) -> Self {
        Self {
            id: template.id.clone(),
            title: template.title.clone(),
            source: template.source,
            steps: parse_steps(&template.description).len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShowReport {
    Template {
        template: Template,
        steps: Vec<Step>,
        errors: Vec<String>,
        instance_count: usize,
    },
    Record {
        record: Record,
        children: Vec<Record>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub template_id: String,
    pub valid: bool,
    pub steps: Vec<Step>,
    pub errors: Vec<String>,
}

/// Arguments for [`Commands::sling`].
#[derive(Debug, Clone, Default)]
pub struct SlingRequest {
    /// Template id or existing instance root id.
    pub thing: String,
    pub agent: Option<String>,
    /// Spawn ephemeral instead of durable.
    pub wisp: bool,
    /// Replace whatever is on the hook.
    pub force: bool,
    pub notify: bool,
    pub bindings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlingReport {
    pub agent: String,
    pub instance_id: String,
    /// Whether a new instance was created from a template.
    pub spawned: bool,
    pub hook_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
    pub notified: bool,
}

/// One workspace: paths, config and the ledger it points at.
pub struct Commands<L> {
    paths: WorkspacePaths,
    config: MolConfig,
    ledger: L,
}

impl Commands<JsonLedger> {
    /// Open the workspace rooted at `root` (config may be absent; the ledger file
    /// is created on first write).
    pub fn open(root: &Path) -> Result<Self> {
        let paths = WorkspacePaths::new(root);
        let config = load_config(&paths.config_path)?;
        let ledger = JsonLedger::open(&paths.ledger_path, &config.id_prefix)
            .with_context(|| format!("open ledger {}", paths.ledger_path.display()))?;
        Ok(Self::new(paths, config, ledger))
    }
}

impl<L: Ledger> Commands<L> {
    pub fn new(paths: WorkspacePaths, config: MolConfig, ledger: L) -> Self {
        Self {
            paths,
            config,
            ledger,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &MolConfig {
        &self.config
    }

    fn sources(&self) -> CatalogSources {
        CatalogSources {
            town_root: self.config.town_root.clone(),
            rig_root: self.config.rig_root.clone(),
            project_root: Some(self.paths.root.clone()),
        }
    }

    pub fn load_catalog(&self) -> Result<Catalog, MolError> {
        Catalog::load(&self.sources(), Some(&self.ledger))
    }

    /// Explicit agent, else the configured default.
    pub fn resolve_agent(&self, agent: Option<&str>) -> Result<String> {
        agent
            .map(str::to_string)
            .or_else(|| self.config.default_agent.clone())
            .ok_or_else(|| anyhow!("no agent given and default_agent is not configured"))
    }

    pub fn list(&self, scope: ListScope) -> Result<Vec<TemplateSummary>> {
        let catalog = self.load_catalog()?;
        Ok(catalog
            .list()
            .into_iter()
            .filter(|t| match scope {
                ListScope::All => true,
                ListScope::Catalog => t.source != Scope::Ledger,
                ListScope::Db => t.source == Scope::Ledger,
            })
            .map(TemplateSummary::of)
            .collect())
    }

    /// Templates only, every scope.
    pub fn catalog(&self) -> Result<Vec<TemplateSummary>> {
        self.list(ListScope::All)
    }

    pub fn show(&self, id: &str) -> Result<ShowReport> {
        let catalog = self.load_catalog()?;
        if let Some(template) = catalog.resolve(id) {
            let steps = parse_steps(&template.description);
            let errors = validate_steps(&steps).iter().map(ToString::to_string).collect();
            let instance_count = progress::instances(&self.ledger, &template.id)?.len();
            return Ok(ShowReport::Template {
                template: template.clone(),
                steps,
                errors,
                instance_count,
            });
        }
        let record = self
            .ledger
            .show(id)
            .map_err(MolError::ledger(Stage::LedgerRead))?;
        let children = self
            .ledger
            .list(&ListFilter::children_of(id))
            .map_err(MolError::ledger(Stage::LedgerRead))?;
        Ok(ShowReport::Record { record, children })
    }

    pub fn parse(&self, template_id: &str) -> Result<ParseReport> {
        let catalog = self.load_catalog()?;
        let template = catalog.require(template_id)?;
        let steps = parse_steps(&template.description);
        let errors: Vec<String> = validate_steps(&steps)
            .iter()
            .map(ToString::to_string)
            .collect();
        Ok(ParseReport {
            template_id: template.id.clone(),
            valid: errors.is_empty(),
            steps,
            errors,
        })
    }

    pub fn instantiate(
        &self,
        template_id: &str,
        parent_id: &str,
        bindings: &BTreeMap<String, String>,
    ) -> Result<Vec<Record>> {
        let catalog = self.load_catalog()?;
        let template = catalog.require(template_id)?;
        Ok(instantiate(&self.ledger, template, parent_id, bindings)?)
    }

    pub fn instances(&self, template_id: &str) -> Result<Vec<InstanceSummary>> {
        let catalog = self.load_catalog()?;
        let id = catalog
            .resolve(template_id)
            .map_or(template_id, |t| t.id.as_str());
        Ok(progress::instances(&self.ledger, id)?)
    }

    pub fn progress(&self, root_id: &str) -> Result<ProgressReport> {
        Ok(progress::progress(&self.ledger, root_id)?)
    }

    /// Attach to the agent's hook. Without `force` the hook must be clear.
    pub fn attach(&self, agent: &str, instance_id: &str, force: bool) -> Result<AttachReport> {
        let report = if force {
            hook::attach(&self.ledger, agent, instance_id)?
        } else {
            hook::attach_exclusive(&self.ledger, agent, instance_id)?
        };
        Ok(report)
    }

    pub fn detach(&self, agent: &str) -> Result<DetachOutcome> {
        Ok(hook::detach(&self.ledger, agent)?)
    }

    pub fn attachment(&self, agent: &str) -> Result<Option<Attachment>> {
        Ok(hook::attachment(&self.ledger, agent)?)
    }

    pub fn status(&self, agent: Option<&str>) -> Result<StatusReport> {
        let agent = self.resolve_agent(agent)?;
        Ok(hook::status(&self.ledger, &agent)?)
    }

    /// Burn whatever is on the agent's hook.
    pub fn burn(&self, agent: Option<&str>, reason: &str) -> Result<BurnOutcome> {
        let agent = self.resolve_agent(agent)?;
        let Some(attached) = hook::attachment(&self.ledger, &agent)? else {
            return Ok(BurnOutcome::NothingAttached { agent });
        };
        Ok(phase::burn(&self.ledger, &attached.instance_id, reason)?)
    }

    /// Squash whatever is on the agent's hook.
    pub fn squash(&self, agent: Option<&str>, summary: &str) -> Result<SquashOutcome> {
        let agent = self.resolve_agent(agent)?;
        let Some(attached) = hook::attachment(&self.ledger, &agent)? else {
            return Ok(SquashOutcome::NothingAttached { agent });
        };
        let options = SquashOptions {
            agent: Some(&agent),
            summary,
            discard_ephemeral_children: self.config.discard_ephemeral_children,
        };
        Ok(phase::squash(&self.ledger, &attached.instance_id, &options)?)
    }

    pub fn pour(&self, template_id: &str, bindings: &BTreeMap<String, String>) -> Result<Instance> {
        let catalog = self.load_catalog()?;
        Ok(phase::pour(&self.ledger, catalog.require(template_id)?, bindings)?)
    }

    pub fn wisp(&self, template_id: &str, bindings: &BTreeMap<String, String>) -> Result<Instance> {
        let catalog = self.load_catalog()?;
        Ok(phase::wisp(&self.ledger, catalog.require(template_id)?, bindings)?)
    }

    /// Bond two ids. A compound template is saved to the project scope.
    pub fn bond(&self, left: &str, right: &str, options: &BondOptions) -> Result<BondOutcome> {
        let catalog = self.load_catalog()?;
        let left = phase::resolve_operand(&self.ledger, &catalog, left)?;
        let right = phase::resolve_operand(&self.ledger, &catalog, right)?;
        let outcome = phase::bond(&self.ledger, &left, &right, options)?;
        if let BondOutcome::Compound { template } = &outcome {
            self.save_template(template)?;
        }
        Ok(outcome)
    }

    /// Distill an instance and save the template to the project scope.
    pub fn distill(&self, root_id: &str, options: &DistillOptions) -> Result<Template> {
        let template = phase::distill(&self.ledger, root_id, options)?;
        self.save_template(&template)?;
        Ok(template)
    }

    fn save_template(&self, template: &Template) -> Result<()> {
        upsert_template(&self.paths.catalog_path, Scope::Project, template)
            .with_context(|| format!("save template {}", template.id))?;
        info!(template = %template.id, path = %self.paths.catalog_path.display(), "template saved");
        Ok(())
    }

    /// Write the builtin templates as JSONL. Returns how many were written.
    pub fn export(&self, path: &Path) -> Result<usize> {
        let templates = builtin_templates()?;
        write_jsonl(path, &templates)
            .with_context(|| format!("export builtin templates to {}", path.display()))?;
        Ok(templates.len())
    }

    /// Put work on an agent's hook and tell the agent about it.
    #[instrument(skip_all, fields(thing = %request.thing))]
    pub fn sling(&self, request: &SlingRequest, session: &dyn AgentSession) -> Result<SlingReport> {
        let agent = self.resolve_agent(request.agent.as_deref())?;
        if !request.force {
            hook::collision_check(&self.ledger, &agent)?;
        }

        let catalog = self.load_catalog()?;
        let (instance_id, template_id, spawned) = match catalog.resolve(&request.thing) {
            Some(template) => {
                let instance = if request.wisp {
                    phase::wisp(&self.ledger, template, &request.bindings)?
                } else {
                    phase::pour(&self.ledger, template, &request.bindings)?
                };
                (instance.root.id, Some(template.id.clone()), true)
            }
            None => {
                let record = self
                    .ledger
                    .show(&request.thing)
                    .map_err(MolError::ledger(Stage::LedgerRead))?;
                let template_id = template_of(&record).map(str::to_string);
                (record.id, template_id, false)
            }
        };

        let attached = self.attach(&agent, &instance_id, request.force)?;
        let notified = request.notify && self.notify(session, &agent, &instance_id, template_id.as_deref());
        info!(%agent, instance = %instance_id, spawned, notified, "slung");
        Ok(SlingReport {
            agent,
            instance_id,
            spawned,
            hook_id: attached.hook_id,
            replaced: attached.replaced,
            notified,
        })
    }

    /// Notify-only: a failed notification leaves the attachment in place.
    fn notify(
        &self,
        session: &dyn AgentSession,
        agent: &str,
        instance_id: &str,
        template_id: Option<&str>,
    ) -> bool {
        let delivered = render_notify(agent, instance_id, template_id)
            .and_then(|message| session.inject(agent, &message));
        match delivered {
            Ok(()) => true,
            Err(err) => {
                warn!(agent, error = %format!("{err:#}"), "session notify failed");
                false
            }
        }
    }
}

/// Forced phase for a `--wisp` / `--durable` flag pair.
pub fn phase_flag(wisp: bool, durable: bool) -> Option<Phase> {
    match (wisp, durable) {
        (true, _) => Some(Phase::Ephemeral),
        (false, true) => Some(Phase::Durable),
        (false, false) => None,
    }
}
