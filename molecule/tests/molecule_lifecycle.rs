//! End-to-end lifecycle tests over the in-memory ledger.
//!
//! Drives instantiate, progress, hooks, bonds and squash/burn through the public
//! library API the way an agent process would.

use std::collections::BTreeMap;

use molecule::core::types::{Kind, Phase, Status};
use molecule::error::MolError;
use molecule::hook;
use molecule::instantiate::instantiate;
use molecule::io::ledger::{Ledger, ListFilter, MemoryLedger, NewRecord, RecordUpdate};
use molecule::phase::{
    self, BondOptions, BondOutcome, BurnOutcome, Operand, SquashOptions, SquashOutcome,
};
use molecule::progress::progress;
use molecule::test_support::{feature_bindings, fixture_template};

fn close(ledger: &MemoryLedger, id: &str) {
    ledger
        .update(id, RecordUpdate::status(Status::Closed))
        .expect("close step");
}

/// review-then-merge under "root-1": ready set walks design, implement, review,
/// then squash yields a digest pointing at root-1 and clears the hook.
#[test]
fn review_then_merge_end_to_end() {
    let ledger = MemoryLedger::default();
    let mut parent = NewRecord::new(Kind::Epic, "Auth work");
    parent.id = Some("root-1".to_string());
    ledger.create(parent).expect("parent");

    let children =
        instantiate(&ledger, &fixture_template(), "root-1", &feature_bindings()).expect("instantiate");
    assert_eq!(children.len(), 3);
    let (design, implement, review) = (&children[0], &children[1], &children[2]);
    assert_eq!(design.title, "Design auth");
    assert_eq!(implement.depends_on, vec![design.id.clone()]);
    assert_eq!(review.depends_on, vec![implement.id.clone()]);

    hook::attach_exclusive(&ledger, "alice", "root-1").expect("attach");

    let report = progress(&ledger, "root-1").expect("progress");
    assert_eq!(report.percent_complete, 0);
    assert_eq!(report.ready_steps, vec![design.id.clone()]);

    close(&ledger, &design.id);
    let report = progress(&ledger, "root-1").expect("progress");
    assert_eq!(report.done_steps, 1);
    assert_eq!(report.ready_steps, vec![implement.id.clone()]);
    assert_eq!(report.blocked_steps, vec![review.id.clone()]);

    close(&ledger, &implement.id);
    let report = progress(&ledger, "root-1").expect("progress");
    assert_eq!(report.ready_steps, vec![review.id.clone()]);

    close(&ledger, &review.id);
    let report = progress(&ledger, "root-1").expect("progress");
    assert_eq!(report.percent_complete, 100);
    assert!(report.complete);

    let outcome = phase::squash(
        &ledger,
        "root-1",
        &SquashOptions {
            agent: Some("alice"),
            summary: "done",
            discard_ephemeral_children: true,
        },
    )
    .expect("squash");
    let SquashOutcome::Squashed {
        digest_id,
        phase,
        detached_hooks,
        ..
    } = outcome
    else {
        panic!("expected squash, got {outcome:?}");
    };
    assert_eq!(phase, Phase::Durable);
    assert_eq!(detached_hooks.len(), 1);

    let digest = ledger.show(&digest_id).expect("digest");
    assert_eq!(digest.kind, Kind::Digest);
    assert!(digest.is_closed());
    assert!(digest.has_label("digest-of:root-1"));
    assert!(digest.description.contains("Squashed from root-1"));
    assert!(digest.description.ends_with("## Summary\ndone"));
    assert!(hook::attachment(&ledger, "alice").expect("attachment").is_none());

    // Durable steps stay for audit.
    assert_eq!(
        ledger
            .list(&ListFilter::children_of("root-1"))
            .expect("children")
            .len(),
        3
    );
}

#[test]
fn digests_are_immutable() {
    let (ledger, instance) = molecule::test_support::seeded_ledger();
    let SquashOutcome::Squashed { digest_id, .. } =
        phase::squash(&ledger, &instance.root.id, &SquashOptions::default()).expect("squash")
    else {
        panic!("expected squash");
    };
    let err = ledger
        .update(&digest_id, RecordUpdate::status(Status::Open))
        .expect_err("digest is immutable");
    assert!(err.to_string().contains("immutable"));
}

/// Dynamic fan-out: a convoy's gather step waits on every bonded child.
#[test]
fn fan_in_waits_for_bonded_children() {
    let ledger = MemoryLedger::default();
    let catalog = molecule::catalog::Catalog::load::<MemoryLedger>(&Default::default(), None)
        .expect("catalog");
    let convoy = phase::pour(&ledger, catalog.require("convoy").expect("convoy"), &BTreeMap::new())
        .expect("convoy");
    let gather = convoy
        .children
        .iter()
        .find(|c| c.has_label("waits-for:all-children"))
        .expect("gather step")
        .clone();

    let host = Operand::Instance {
        root: convoy.root.clone(),
        phase: Phase::Durable,
    };
    let mut spawned = Vec::new();
    for _ in 0..2 {
        let outcome = phase::bond(
            &ledger,
            &Operand::Template(catalog.require("quick-fix").expect("quick-fix").clone()),
            &host,
            &BondOptions::default(),
        )
        .expect("bond");
        let BondOutcome::Spawned { instance, .. } = outcome else {
            panic!("expected spawn");
        };
        spawned.push(instance);
    }

    // Close everything except the spawned roots: gather stays blocked.
    for child in &convoy.children {
        if child.id != gather.id {
            close(&ledger, &child.id);
        }
    }
    let report = progress(&ledger, &convoy.root.id).expect("progress");
    let join = report
        .joins
        .iter()
        .find(|j| j.step_id == gather.id)
        .expect("join");
    assert_eq!((join.expected, join.completed), (2, 0));
    assert!(report.blocked_steps.contains(&gather.id));

    for instance in &spawned {
        phase::squash(&ledger, &instance.root.id, &SquashOptions::default()).expect("squash child");
    }
    let report = progress(&ledger, &convoy.root.id).expect("progress");
    let join = report
        .joins
        .iter()
        .find(|j| j.step_id == gather.id)
        .expect("join");
    assert_eq!(join.completed, 2);
    assert!(report.ready_steps.contains(&gather.id));
}

#[test]
fn burn_on_durable_instance_fails_loudly() {
    let (ledger, instance) = molecule::test_support::seeded_ledger();
    let err = phase::burn(&ledger, &instance.root.id, "").expect_err("durable burn");
    assert!(matches!(err, MolError::BurnDurable { .. }));
    assert_eq!(
        ledger
            .list(&ListFilter::children_of(&instance.root.id))
            .expect("children")
            .iter()
            .filter(|c| c.is_closed())
            .count(),
        0
    );
}

#[test]
fn ephemeral_burn_clears_hook() {
    let ledger = MemoryLedger::default();
    let instance =
        phase::wisp(&ledger, &fixture_template(), &feature_bindings()).expect("wisp");
    hook::attach(&ledger, "bob", &instance.root.id).expect("attach");
    let outcome = phase::burn(&ledger, &instance.root.id, "superseded").expect("burn");
    assert!(matches!(
        outcome,
        BurnOutcome::Burned { ref detached_hooks, .. } if detached_hooks.len() == 1
    ));
    assert!(!hook::status(&ledger, "bob").expect("status").has_work);
}
