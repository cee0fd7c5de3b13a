//! Phase engine: pour, wisp, bond, squash, burn and distill.
//!
//! Phases: templates (solid), durable instances (liquid) and ephemeral instances
//! (vapor). An instance never changes phase in place; combining phases either
//! spawns a new instance or adds an edge between roots.
//!
//! An ephemeral root's id doubles as its reserved digest id. Squashing rewrites
//! that record into the digest, so a reference taken before the squash still
//! resolves afterwards.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::core::bond::{BondPlan, OperandKind, Side, compound_template, plan_bond};
use crate::core::digest::{Digest, existing_digest_id};
use crate::core::progress::classify;
use crate::core::provenance::{
    self, BURNED, DIGEST_LABEL, DIGEST_OF_LABEL, DISCARDED, JOIN_LABEL, REF_LABEL, SQUASHED,
    TEMPLATE_LABEL, TIER_LABEL, WAITS_FOR_CHILDREN,
};
use crate::core::steps::{preamble, render_steps};
use crate::core::types::{Kind, Phase, Record, Scope, Status, Step, Template};
use crate::core::vars::{abstract_literals, substitute};
use crate::error::{MolError, Stage};
use crate::hook::detach_holders;
use crate::instantiate::{checked_steps, instantiate};
use crate::io::ledger::{Ledger, ListFilter, NewRecord, RecordUpdate, now_rfc3339};
use crate::io::render::render_digest;

/// A root plus the step children created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub root: Record,
    pub children: Vec<Record>,
    pub phase: Phase,
}

/// Create a new durable instance of `template`.
pub fn pour<L: Ledger>(
    ledger: &L,
    template: &Template,
    bindings: &BTreeMap<String, String>,
) -> Result<Instance, MolError> {
    spawn(ledger, template, None, Phase::Durable, bindings)
}

/// Create a new ephemeral instance of `template`.
pub fn wisp<L: Ledger>(
    ledger: &L,
    template: &Template,
    bindings: &BTreeMap<String, String>,
) -> Result<Instance, MolError> {
    spawn(ledger, template, None, Phase::Ephemeral, bindings)
}

/// Create an instance root (optionally under `host`) and instantiate onto it.
///
/// Under a host, every open fan-in step of the host gains the new root as a
/// dependency and its join counter grows by one.
#[instrument(skip_all, fields(template = %template.id, phase = %phase, host = host.map(|h| h.id.as_str())))]
pub fn spawn<L: Ledger>(
    ledger: &L,
    template: &Template,
    host: Option<&Record>,
    phase: Phase,
    bindings: &BTreeMap<String, String>,
) -> Result<Instance, MolError> {
    // Reject a bad template before the root exists.
    checked_steps(template)?;

    let root = NewRecord {
        description: substitute(&preamble(&template.description), bindings),
        parent: host.map(|h| h.id.clone()),
        labels: vec![
            provenance::label(provenance::TEMPLATE_LABEL, &template.id),
            provenance::phase_label(phase),
        ],
        ..NewRecord::new(Kind::Epic, substitute(&template.title, bindings))
    };
    let root = ledger
        .create(root)
        .map_err(MolError::ledger(Stage::Instantiate))?;
    let children = instantiate(ledger, template, &root.id, bindings)?;
    let root = ledger
        .show(&root.id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;

    if let Some(host) = host {
        extend_joins(ledger, &host.id, &root.id)?;
    }

    info!(root = %root.id, children = children.len(), "spawned instance");
    Ok(Instance {
        root,
        children,
        phase,
    })
}

fn extend_joins<L: Ledger>(ledger: &L, host_id: &str, new_root: &str) -> Result<(), MolError> {
    let steps = ledger
        .list(&ListFilter {
            label: Some(WAITS_FOR_CHILDREN.to_string()),
            ..ListFilter::children_of(host_id)
        })
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    for step in steps.into_iter().filter(|s| !s.is_closed()) {
        let expected = provenance::join_expected(&step).unwrap_or(0);
        let mut depends_on = step.depends_on.clone();
        depends_on.push(new_root.to_string());
        let update = RecordUpdate {
            depends_on: Some(depends_on),
            remove_labels: step
                .labels
                .iter()
                .filter(|l| l.starts_with(&format!("{JOIN_LABEL}:")))
                .cloned()
                .collect(),
            add_labels: vec![provenance::label(JOIN_LABEL, &(expected + 1).to_string())],
            ..RecordUpdate::default()
        };
        ledger
            .update(&step.id, update)
            .map_err(MolError::ledger(Stage::LedgerWrite))?;
        debug!(step = %step.id, expected = expected + 1, "extended join");
    }
    Ok(())
}

/// One resolved bond operand.
#[derive(Debug, Clone)]
pub enum Operand {
    Template(Template),
    Instance { root: Record, phase: Phase },
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Template(_) => OperandKind::Template,
            Operand::Instance { phase, .. } => OperandKind::from_phase(*phase),
        }
    }

    fn id(&self) -> &str {
        match self {
            Operand::Template(t) => &t.id,
            Operand::Instance { root, .. } => &root.id,
        }
    }
}

/// Resolve an id to a template (catalog or ledger template record) or an
/// instance root.
pub fn resolve_operand<L: Ledger>(
    ledger: &L,
    catalog: &Catalog,
    id: &str,
) -> Result<Operand, MolError> {
    if let Some(template) = catalog.resolve(id) {
        return Ok(Operand::Template(template.clone()));
    }
    let record = ledger.show(id).map_err(|err| match MolError::ledger(Stage::LedgerRead)(err) {
        MolError::NotFound { stage, id, .. } => MolError::NotFound {
            stage,
            what: "bond operand",
            id,
        },
        other => other,
    })?;
    match record.kind {
        Kind::Template => return Ok(Operand::Template(Template::from_record(&record))),
        Kind::Digest | Kind::Hook => {
            return Err(MolError::InvalidBond(format!(
                "{id} is a {} record and cannot be bonded",
                record.kind
            )));
        }
        Kind::Task | Kind::Epic => {}
    }
    if record.has_label(SQUASHED) || record.has_label(BURNED) {
        return Err(MolError::InvalidBond(format!(
            "{id} has already been disposed of"
        )));
    }
    let phase = match provenance::phase_of(&record) {
        Some(phase) => phase,
        None if provenance::template_of(&record).is_some() => Phase::Durable,
        None => {
            return Err(MolError::InvalidBond(format!(
                "{id} is neither a template nor an instance root"
            )));
        }
    };
    Ok(Operand::Instance {
        root: record,
        phase,
    })
}

/// Options for [`bond`].
#[derive(Debug, Clone, Default)]
pub struct BondOptions {
    /// Force the phase of a spawned instance. Ignored by linking bonds.
    pub force: Option<Phase>,
    pub bindings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Dependency,
    Reference,
}

/// Result of a bond.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BondOutcome {
    /// New template; persisting it is up to the caller.
    Compound { template: Template },
    Spawned { host_id: String, instance: Instance },
    Linked {
        edge: EdgeKind,
        from: String,
        to: String,
        already_linked: bool,
    },
}

/// Combine two operands according to the bond table.
#[instrument(skip_all, fields(left = left.id(), right = right.id()))]
pub fn bond<L: Ledger>(
    ledger: &L,
    left: &Operand,
    right: &Operand,
    options: &BondOptions,
) -> Result<BondOutcome, MolError> {
    if left.id() == right.id() {
        return Err(MolError::InvalidBond(format!(
            "cannot bond {} with itself",
            left.id()
        )));
    }
    let plan = plan_bond(left.kind(), right.kind(), options.force);
    if options.force.is_some() && !plan.creates_instance() {
        warn!(?plan, "phase override ignored for a bond that creates no instance");
    }
    debug!(?plan, "bond planned");

    let pick = |side: Side| match side {
        Side::Left => left,
        Side::Right => right,
    };

    match plan {
        BondPlan::CompoundTemplate => {
            let (Operand::Template(a), Operand::Template(b)) = (left, right) else {
                return Err(MolError::InvalidBond("compound bond needs two templates".to_string()));
            };
            let template = compound_template(a, b).map_err(|issues| MolError::Validation {
                template: format!("{}+{}", a.id, b.id),
                issues,
            })?;
            info!(template = %template.id, "compound template built");
            Ok(BondOutcome::Compound { template })
        }
        BondPlan::Spawn {
            template,
            host,
            phase,
        } => {
            let (Operand::Template(template), Operand::Instance { root: host, .. }) =
                (pick(template), pick(host))
            else {
                return Err(MolError::InvalidBond(
                    "spawn bond needs a template and an instance".to_string(),
                ));
            };
            let instance = spawn(ledger, template, Some(host), phase, &options.bindings)?;
            Ok(BondOutcome::Spawned {
                host_id: host.id.clone(),
                instance,
            })
        }
        BondPlan::DependencyEdge { blocker, dependent } => {
            let blocker = pick(blocker).id().to_string();
            let dependent = pick(dependent).id().to_string();
            add_dependency(ledger, &blocker, &dependent)
        }
        BondPlan::ReferenceEdge => add_reference(ledger, left.id(), right.id()),
    }
}

fn add_dependency<L: Ledger>(
    ledger: &L,
    blocker: &str,
    dependent: &str,
) -> Result<BondOutcome, MolError> {
    let record = ledger
        .show(dependent)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let linked = |already_linked| BondOutcome::Linked {
        edge: EdgeKind::Dependency,
        from: blocker.to_string(),
        to: dependent.to_string(),
        already_linked,
    };
    if record.depends_on.iter().any(|d| d == blocker) {
        return Ok(linked(true));
    }
    if reaches(ledger, blocker, dependent)? {
        return Err(MolError::InvalidBond(format!(
            "{dependent} depending on {blocker} would create a dependency cycle"
        )));
    }
    let mut depends_on = record.depends_on;
    depends_on.push(blocker.to_string());
    ledger
        .update(dependent, RecordUpdate::depends_on(depends_on))
        .map_err(MolError::ledger(Stage::LedgerWrite))?;
    info!(blocker, dependent, "dependency edge added");
    Ok(linked(false))
}

/// Whether `target` is reachable from `start` along `depends_on` edges.
fn reaches<L: Ledger>(ledger: &L, start: &str, target: &str) -> Result<bool, MolError> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(id) = stack.pop() {
        if id == target {
            return Ok(true);
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        let record = ledger
            .show(&id)
            .map_err(MolError::ledger(Stage::LedgerRead))?;
        stack.extend(record.depends_on);
    }
    Ok(false)
}

fn add_reference<L: Ledger>(ledger: &L, left: &str, right: &str) -> Result<BondOutcome, MolError> {
    let left_record = ledger
        .show(left)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let right_label = provenance::label(REF_LABEL, right);
    let already_linked = left_record.has_label(&right_label);
    for (id, label) in [
        (left, right_label),
        (right, provenance::label(REF_LABEL, left)),
    ] {
        ledger
            .update(id, RecordUpdate::labels([label]))
            .map_err(MolError::ledger(Stage::LedgerWrite))?;
    }
    info!(left, right, "reference edge added");
    Ok(BondOutcome::Linked {
        edge: EdgeKind::Reference,
        from: left.to_string(),
        to: right.to_string(),
        already_linked,
    })
}

/// Result of a squash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SquashOutcome {
    Squashed {
        instance_id: String,
        digest_id: String,
        phase: Phase,
        detached_hooks: Vec<String>,
    },
    /// The instance already has a digest; no second one is written.
    AlreadySquashed {
        instance_id: String,
        digest_id: String,
        detached_hooks: Vec<String>,
    },
    /// Burned instances have no digest and never get one.
    AlreadyBurned {
        instance_id: String,
        detached_hooks: Vec<String>,
    },
    NothingAttached { agent: String },
}

/// Options for [`squash`].
#[derive(Debug, Clone, Default)]
pub struct SquashOptions<'a> {
    pub agent: Option<&'a str>,
    pub summary: &'a str,
    /// Close and label ephemeral children as discarded.
    pub discard_ephemeral_children: bool,
}

/// Condense an instance into a digest, then detach every hook holding it.
///
/// Durable instances get a new digest record and keep their steps. Ephemeral
/// instances are rewritten in place into the digest. A durable digest that was
/// written without its root pointer is found by its `digest-of` label and
/// reused, so a retried squash never writes a second one.
#[instrument(skip_all, fields(instance = root_id))]
pub fn squash<L: Ledger>(
    ledger: &L,
    root_id: &str,
    options: &SquashOptions<'_>,
) -> Result<SquashOutcome, MolError> {
    let root = ledger
        .show(root_id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    if let Some(digest_id) = existing_digest_id(&root) {
        let digest_id = digest_id.to_string();
        let detached_hooks = detach_holders(ledger, root_id)?;
        debug!(%digest_id, "already squashed");
        return Ok(SquashOutcome::AlreadySquashed {
            instance_id: root_id.to_string(),
            digest_id,
            detached_hooks,
        });
    }
    if root.has_label(BURNED) {
        let detached_hooks = detach_holders(ledger, root_id)?;
        debug!("already burned");
        return Ok(SquashOutcome::AlreadyBurned {
            instance_id: root_id.to_string(),
            detached_hooks,
        });
    }
    if let Some(digest_id) = unlinked_digest(ledger, root_id)? {
        mark_squashed(ledger, root_id, &digest_id)?;
        let detached_hooks = detach_holders(ledger, root_id)?;
        warn!(%digest_id, "reusing digest from an interrupted squash");
        return Ok(SquashOutcome::AlreadySquashed {
            instance_id: root_id.to_string(),
            digest_id,
            detached_hooks,
        });
    }

    let children = ledger
        .list(&ListFilter::children_of(root_id))
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    if children.is_empty() && provenance::template_of(&root).is_none() {
        return Err(MolError::NotAnInstance {
            id: root_id.to_string(),
        });
    }
    let phase = provenance::phase_of(&root).unwrap_or(Phase::Durable);
    let progress = classify(&root, &children);
    let digest = Digest::compose(
        &root,
        phase,
        progress.as_ref(),
        options.agent,
        options.summary,
        &now_rfc3339(),
    );
    let description = render_digest(&digest).map_err(|err| MolError::Render(format!("{err:#}")))?;

    let digest_id = match phase {
        Phase::Durable => {
            let record = NewRecord {
                status: Status::Closed,
                description,
                assignee: options.agent.map(str::to_string),
                labels: digest.labels(),
                ..NewRecord::new(Kind::Digest, digest.title())
            };
            let created = ledger
                .create(record)
                .map_err(MolError::ledger(Stage::LedgerWrite))?;
            mark_squashed(ledger, root_id, &created.id)?;
            created.id
        }
        Phase::Ephemeral => {
            if options.discard_ephemeral_children {
                discard_children(ledger, &children)?;
            }
            let mut labels = digest.labels();
            labels.push(SQUASHED.to_string());
            // The digest is no longer a live instance of its template.
            let update = RecordUpdate {
                title: Some(digest.title()),
                description: Some(description),
                kind: Some(Kind::Digest),
                status: Some(Status::Closed),
                add_labels: labels,
                remove_labels: provenance::template_of(&root)
                    .map(|t| provenance::label(TEMPLATE_LABEL, t))
                    .into_iter()
                    .collect(),
                ..RecordUpdate::default()
            };
            ledger
                .update(root_id, update)
                .map_err(MolError::ledger(Stage::LedgerWrite))?;
            root_id.to_string()
        }
    };

    let detached_hooks = detach_holders(ledger, root_id)?;
    info!(%digest_id, %phase, "instance squashed");
    Ok(SquashOutcome::Squashed {
        instance_id: root_id.to_string(),
        digest_id,
        phase,
        detached_hooks,
    })
}

/// Digest already written for a durable root whose `digest:` pointer is missing.
fn unlinked_digest<L: Ledger>(ledger: &L, root_id: &str) -> Result<Option<String>, MolError> {
    let digests = ledger
        .list(&ListFilter {
            kind: Some(Kind::Digest),
            ..ListFilter::labeled(provenance::label(DIGEST_OF_LABEL, root_id))
        })
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    Ok(digests.into_iter().next().map(|d| d.id))
}

fn mark_squashed<L: Ledger>(ledger: &L, root_id: &str, digest_id: &str) -> Result<(), MolError> {
    let update = RecordUpdate {
        status: Some(Status::Closed),
        add_labels: vec![
            SQUASHED.to_string(),
            provenance::label(DIGEST_LABEL, digest_id),
        ],
        ..RecordUpdate::default()
    };
    ledger
        .update(root_id, update)
        .map_err(MolError::ledger(Stage::LedgerWrite))?;
    Ok(())
}

/// Close and label step children as discarded. Digests and durable
/// sub-instances bonded under the root are kept for audit.
fn discard_children<L: Ledger>(ledger: &L, children: &[Record]) -> Result<usize, MolError> {
    let mut discarded = 0;
    for child in children
        .iter()
        .filter(|c| c.kind != Kind::Digest && provenance::phase_of(c) != Some(Phase::Durable))
    {
        let update = RecordUpdate {
            status: Some(Status::Closed),
            add_labels: vec![DISCARDED.to_string()],
            ..RecordUpdate::default()
        };
        ledger
            .update(&child.id, update)
            .map_err(MolError::ledger(Stage::LedgerWrite))?;
        discarded += 1;
    }
    Ok(discarded)
}

/// Result of a burn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BurnOutcome {
    Burned {
        instance_id: String,
        discarded: usize,
        detached_hooks: Vec<String>,
    },
    AlreadyBurned { instance_id: String },
    /// Ephemeral instance already condensed into its digest.
    AlreadySquashed { instance_id: String, digest_id: String },
    NothingAttached { agent: String },
}

/// Discard an ephemeral instance without a digest. Durable instances are refused.
#[instrument(skip_all, fields(instance = root_id))]
pub fn burn<L: Ledger>(ledger: &L, root_id: &str, reason: &str) -> Result<BurnOutcome, MolError> {
    let root = ledger
        .show(root_id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    if root.has_label(BURNED) {
        return Ok(BurnOutcome::AlreadyBurned {
            instance_id: root_id.to_string(),
        });
    }
    match provenance::phase_of(&root) {
        Some(Phase::Ephemeral) if root.kind != Kind::Digest => {}
        Some(Phase::Ephemeral) => {
            debug!("already squashed");
            return Ok(BurnOutcome::AlreadySquashed {
                instance_id: root_id.to_string(),
                digest_id: root_id.to_string(),
            });
        }
        Some(Phase::Durable) => {
            return Err(MolError::BurnDurable {
                instance: root_id.to_string(),
            });
        }
        None if provenance::template_of(&root).is_some() => {
            return Err(MolError::BurnDurable {
                instance: root_id.to_string(),
            });
        }
        None => {
            return Err(MolError::NotAnInstance {
                id: root_id.to_string(),
            });
        }
    }

    let children = ledger
        .list(&ListFilter::children_of(root_id))
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let discarded = discard_children(ledger, &children)?;
    let reason = reason.trim();
    let update = RecordUpdate {
        status: Some(Status::Closed),
        add_labels: vec![BURNED.to_string()],
        description: (!reason.is_empty())
            .then(|| format!("{}\n\nBurned: {reason}", root.description.trim_end())),
        ..RecordUpdate::default()
    };
    ledger
        .update(root_id, update)
        .map_err(MolError::ledger(Stage::LedgerWrite))?;

    let detached_hooks = detach_holders(ledger, root_id)?;
    info!(discarded, "instance burned");
    Ok(BurnOutcome::Burned {
        instance_id: root_id.to_string(),
        discarded,
        detached_hooks,
    })
}

/// Options for [`distill`].
#[derive(Debug, Clone, Default)]
pub struct DistillOptions {
    pub template_id: String,
    pub title: Option<String>,
    /// Literal value -> variable name.
    pub literals: BTreeMap<String, String>,
}

/// Rebuild a template from an instance's graph. The instance is only read.
#[instrument(skip_all, fields(instance = root_id, template = %options.template_id))]
pub fn distill<L: Ledger>(
    ledger: &L,
    root_id: &str,
    options: &DistillOptions,
) -> Result<Template, MolError> {
    let root = ledger
        .show(root_id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    // Bonded sub-instances are children too, but they are not steps.
    let children: Vec<Record> = ledger
        .list(&ListFilter::children_of(root_id))
        .map_err(MolError::ledger(Stage::LedgerRead))?
        .into_iter()
        .filter(|c| provenance::template_of(c).is_none())
        .collect();
    if children.is_empty() {
        return Err(MolError::NotAnInstance {
            id: root_id.to_string(),
        });
    }

    let refs: BTreeMap<&str, String> = children
        .iter()
        .enumerate()
        .map(|(idx, child)| {
            let step_ref = provenance::extract(&child.description)
                .and_then(|(_, step)| step)
                .unwrap_or_else(|| format!("step-{}", idx + 1));
            (child.id.as_str(), step_ref)
        })
        .collect();

    let abstracted = |text: &str| abstract_literals(text, &options.literals);
    let steps: Vec<Step> = children
        .iter()
        .map(|child| {
            let mut step = Step::new(&refs[child.id.as_str()]);
            step.title = abstracted(&child.title);
            step.instructions = abstracted(&provenance::strip(&child.description));
            step.needs = child
                .depends_on
                .iter()
                .filter_map(|dep| refs.get(dep.as_str()).cloned())
                .collect();
            step.tier = child.label_value(TIER_LABEL).map(str::to_string);
            step.waits_for_children = child.has_label(WAITS_FOR_CHILDREN);
            step
        })
        .collect();

    let template = Template {
        id: options.template_id.clone(),
        title: options
            .title
            .clone()
            .unwrap_or_else(|| abstracted(&root.title)),
        description: render_steps(&abstracted(&root.description), &steps),
        source: Scope::Project,
    };
    checked_steps(&template)?;
    info!(steps = steps.len(), "distilled template");
    Ok(template)
}
