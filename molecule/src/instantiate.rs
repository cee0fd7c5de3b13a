//! Materialize a template onto a parent record.
//!
//! Validation happens before any write, so a bad template leaves the ledger
//! untouched. After that the ledger offers no transaction: a failure midway leaves
//! the children created so far in place, visible to concurrent readers.
//!
//! Re-running against the same parent creates a second, independent set of
//! children. Avoiding duplicate instantiation is the caller's job.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, instrument};

use crate::core::graph::validate_steps;
use crate::core::provenance::{self, JOIN_LABEL, TIER_LABEL, WAITS_FOR_CHILDREN};
use crate::core::steps::parse_steps;
use crate::core::types::{Kind, Phase, Record, Step, Template};
use crate::core::vars::substitute;
use crate::error::{MolError, Stage};
use crate::io::ledger::{Ledger, NewRecord, RecordUpdate};

/// Parse and validate a template body, returning its steps.
pub fn checked_steps(template: &Template) -> Result<Vec<Step>, MolError> {
    let steps = parse_steps(&template.description);
    let issues = validate_steps(&steps);
    if issues.is_empty() {
        Ok(steps)
    } else {
        Err(MolError::Validation {
            template: template.id.clone(),
            issues,
        })
    }
}

/// Create one child per step under `parent_id` and wire their dependencies.
///
/// Returns the created children in declaration order.
#[instrument(skip_all, fields(template = %template.id, parent = parent_id))]
pub fn instantiate<L: Ledger>(
    ledger: &L,
    template: &Template,
    parent_id: &str,
    bindings: &BTreeMap<String, String>,
) -> Result<Vec<Record>, MolError> {
    let steps = checked_steps(template)?;
    let parent = ledger
        .show(parent_id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;

    let mut created = Vec::with_capacity(steps.len());
    for step in &steps {
        let child = ledger
            .create(step_record(template, &parent.id, step, bindings))
            .map_err(MolError::ledger(Stage::Instantiate))?;
        debug!(step = %step.step_ref, id = %child.id, "created step");
        created.push(child);
    }

    let ids: HashMap<&str, String> = steps
        .iter()
        .zip(&created)
        .map(|(step, child)| (step.step_ref.as_str(), child.id.clone()))
        .collect();
    for (step, child) in steps.iter().zip(created.iter_mut()) {
        if step.needs.is_empty() {
            continue;
        }
        // Validation guarantees every need resolves.
        let depends_on: Vec<String> = step
            .needs
            .iter()
            .filter_map(|need| ids.get(need.as_str()).cloned())
            .collect();
        *child = ledger
            .update(&child.id, RecordUpdate::depends_on(depends_on))
            .map_err(MolError::ledger(Stage::Instantiate))?;
    }

    tag_instance_root(ledger, &parent, &template.id)?;
    info!(children = created.len(), "instantiated template");
    Ok(created)
}

fn step_record(
    template: &Template,
    parent_id: &str,
    step: &Step,
    bindings: &BTreeMap<String, String>,
) -> NewRecord {
    let mut labels = Vec::new();
    if let Some(tier) = &step.tier {
        labels.push(provenance::label(TIER_LABEL, tier));
    }
    if step.waits_for_children {
        labels.push(WAITS_FOR_CHILDREN.to_string());
        labels.push(provenance::label(JOIN_LABEL, "0"));
    }
    NewRecord {
        title: substitute(&step.title, bindings),
        description: provenance::with_provenance(
            &substitute(&step.instructions, bindings),
            &template.id,
            &step.step_ref,
        ),
        parent: Some(parent_id.to_string()),
        labels,
        ..NewRecord::new(Kind::Task, String::new())
    }
}

/// Record the template index label (and a durable phase if none is set) on the root.
fn tag_instance_root<L: Ledger>(ledger: &L, root: &Record, template_id: &str) -> Result<(), MolError> {
    let mut labels = Vec::new();
    let template_label = provenance::label(provenance::TEMPLATE_LABEL, template_id);
    if !root.has_label(&template_label) {
        labels.push(template_label);
    }
    if provenance::phase_of(root).is_none() {
        labels.push(provenance::phase_label(Phase::Durable));
    }
    if labels.is_empty() {
        return Ok(());
    }
    ledger
        .update(&root.id, RecordUpdate::labels(labels))
        .map_err(MolError::ledger(Stage::LedgerWrite))?;
    Ok(())
}
