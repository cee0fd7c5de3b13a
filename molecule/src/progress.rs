//! Ledger-backed progress queries. Every call re-reads the ledger.

use serde::Serialize;

use crate::core::progress::classify;
use crate::core::provenance::{self, TEMPLATE_LABEL};
use crate::core::types::{Phase, ProgressReport, Status};
use crate::error::{MolError, Stage};
use crate::io::ledger::{Ledger, ListFilter};

/// Progress of the instance rooted at `root_id`.
pub fn progress<L: Ledger>(ledger: &L, root_id: &str) -> Result<ProgressReport, MolError> {
    let root = ledger
        .show(root_id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let children = ledger
        .list(&ListFilter::children_of(root_id))
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    classify(&root, &children).ok_or_else(|| MolError::NotAnInstance {
        id: root_id.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    pub root_id: String,
    pub title: String,
    pub phase: Option<Phase>,
    pub status: Status,
    pub done_steps: usize,
    pub total_steps: usize,
}

/// Every instance root created from `template_id`, in creation order.
pub fn instances<L: Ledger>(
    ledger: &L,
    template_id: &str,
) -> Result<Vec<InstanceSummary>, MolError> {
    let roots = ledger
        .list(&ListFilter::labeled(provenance::label(
            TEMPLATE_LABEL,
            template_id,
        )))
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    roots
        .into_iter()
        .map(|root| {
            let children = ledger
                .list(&ListFilter::children_of(&root.id))
                .map_err(MolError::ledger(Stage::LedgerRead))?;
            let report = classify(&root, &children);
            Ok(InstanceSummary {
                phase: provenance::phase_of(&root),
                status: root.status,
                done_steps: report.as_ref().map_or(0, |r| r.done_steps),
                total_steps: report.as_ref().map_or(0, |r| r.total_steps),
                root_id: root.id,
                title: root.title,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Kind, Status};
    use crate::io::ledger::{NewRecord, RecordUpdate};
    use crate::test_support::{fixture_template, seeded_ledger};

    #[test]
    fn progress_follows_step_closure() {
        let (ledger, instance) = seeded_ledger();
        let report = progress(&ledger, &instance.root.id).expect("progress");
        assert_eq!(report.total_steps, 3);
        assert_eq!(report.ready_steps, vec![instance.children[0].id.clone()]);

        ledger
            .update(&instance.children[0].id, RecordUpdate::status(Status::Closed))
            .expect("close");
        let report = progress(&ledger, &instance.root.id).expect("progress");
        assert_eq!(report.done_steps, 1);
        assert_eq!(report.percent_complete, 33);
        assert_eq!(report.ready_steps, vec![instance.children[1].id.clone()]);
    }

    #[test]
    fn childless_record_is_not_an_instance() {
        let (ledger, _) = seeded_ledger();
        let plain = ledger
            .create(NewRecord::new(Kind::Task, "plain"))
            .expect("create");
        assert!(matches!(
            progress(&ledger, &plain.id),
            Err(MolError::NotAnInstance { .. })
        ));
    }

    #[test]
    fn instances_lists_roots_by_template() {
        let (ledger, instance) = seeded_ledger();
        let found = instances(&ledger, &fixture_template().id).expect("instances");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].root_id, instance.root.id);
        assert_eq!(found[0].phase, Some(Phase::Durable));
        assert_eq!((found[0].done_steps, found[0].total_steps), (0, 3));
        assert!(instances(&ledger, "mol-unused").expect("none").is_empty());
    }
}
