//! Progress classification over an instance snapshot.
//!
//! Classification rules:
//! - closed -> done
//! - in_progress or pinned -> in progress
//! - blocked -> blocked
//! - open with every dependency closed (or none) -> ready
//! - open otherwise -> blocked

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::provenance::{self, WAITS_FOR_CHILDREN};
use crate::core::types::{JoinStatus, ProgressReport, Record, Status};

/// Classify the direct children of `root`. `None` when `root` has no children.
pub fn classify(root: &Record, children: &[Record]) -> Option<ProgressReport> {
    if children.is_empty() {
        return None;
    }

    let closed: BTreeSet<&str> = children
        .iter()
        .filter(|c| c.is_closed())
        .map(|c| c.id.as_str())
        .collect();

    let mut done = 0;
    let mut in_progress = 0;
    let mut ready = Vec::new();
    let mut blocked = Vec::new();

    for child in children {
        match child.status {
            Status::Closed => done += 1,
            Status::InProgress | Status::Pinned => in_progress += 1,
            Status::Blocked => blocked.push(child.id.clone()),
            Status::Open => {
                if child
                    .depends_on
                    .iter()
                    .all(|dep| closed.contains(dep.as_str()))
                {
                    ready.push(child.id.clone());
                } else {
                    blocked.push(child.id.clone());
                }
            }
        }
    }

    let total = children.len();
    Some(ProgressReport {
        root_id: root.id.clone(),
        root_title: root.title.clone(),
        template_id: provenance::template_of(root).map(str::to_string),
        total_steps: total,
        done_steps: done,
        in_progress_steps: in_progress,
        ready_steps: ready,
        blocked_steps: blocked,
        percent_complete: done * 100 / total,
        complete: done == total,
        joins: joins(children, &closed),
    })
}

/// Counted joins for fan-in steps.
///
/// A fan-in step's bonded children are its dependencies that are themselves
/// instance roots (they carry a `template:` label).
fn joins(children: &[Record], closed: &BTreeSet<&str>) -> Vec<JoinStatus> {
    let roots: BTreeSet<&str> = children
        .iter()
        .filter(|c| provenance::template_of(c).is_some())
        .map(|c| c.id.as_str())
        .collect();

    children
        .iter()
        .filter(|c| c.has_label(WAITS_FOR_CHILDREN))
        .map(|step| {
            let bonded: Vec<&str> = step
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| roots.contains(dep))
                .collect();
            JoinStatus {
                step_id: step.id.clone(),
                expected: provenance::join_expected(step).unwrap_or(bonded.len()),
                completed: bonded.iter().filter(|dep| closed.contains(*dep)).count(),
            }
        })
        .collect()
}

/// Suggested next move for an agent holding an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextAction {
    /// Every step is closed; squash (or burn) the instance.
    Complete,
    /// A step is already under way.
    Continue { step_id: String },
    /// First ready step in creation order.
    Start { step_id: String },
    /// Nothing is ready and nothing is in progress.
    AllBlocked,
    /// Nothing attached.
    Idle,
}

impl NextAction {
    pub fn hint(&self) -> String {
        match self {
            NextAction::Complete => "all steps closed; squash the instance".to_string(),
            NextAction::Continue { step_id } => format!("continue in-progress step {step_id}"),
            NextAction::Start { step_id } => format!("start ready step {step_id}"),
            NextAction::AllBlocked => "all remaining steps are blocked".to_string(),
            NextAction::Idle => "nothing attached; check inbox or sling a molecule".to_string(),
        }
    }
}

/// Derive the next action from a report and the children it was computed from.
pub fn next_action(report: Option<&ProgressReport>, children: &[Record]) -> NextAction {
    let Some(report) = report else {
        return NextAction::Idle;
    };
    if report.complete {
        return NextAction::Complete;
    }
    if let Some(active) = children
        .iter()
        .find(|c| matches!(c.status, Status::InProgress | Status::Pinned))
    {
        return NextAction::Continue {
            step_id: active.id.clone(),
        };
    }
    match report.ready_steps.first() {
        Some(step_id) => NextAction::Start {
            step_id: step_id.clone(),
        },
        None => NextAction::AllBlocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Kind;

    fn record(id: &str, status: Status, deps: &[&str]) -> Record {
        Record {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            kind: Kind::Task,
            status,
            assignee: None,
            parent: Some("root".to_string()),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            labels: Vec::new(),
            attachment: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn root() -> Record {
        let mut root = record("root", Status::Open, &[]);
        root.kind = Kind::Epic;
        root.parent = None;
        root.labels = vec!["template:mol-review".to_string()];
        root
    }

    #[test]
    fn no_children_is_not_an_instance() {
        assert_eq!(classify(&root(), &[]), None);
    }

    #[test]
    fn classifies_chain() {
        let children = vec![
            record("a", Status::Closed, &[]),
            record("b", Status::Open, &["a"]),
            record("c", Status::Open, &["b"]),
            record("d", Status::InProgress, &[]),
        ];
        let report = classify(&root(), &children).expect("report");
        assert_eq!(report.total_steps, 4);
        assert_eq!(report.done_steps, 1);
        assert_eq!(report.in_progress_steps, 1);
        assert_eq!(report.ready_steps, vec!["b"]);
        assert_eq!(report.blocked_steps, vec!["c"]);
        assert_eq!(report.percent_complete, 25);
        assert!(!report.complete);
        assert_eq!(report.template_id.as_deref(), Some("mol-review"));
    }

    #[test]
    fn percent_floors() {
        let children = vec![
            record("a", Status::Closed, &[]),
            record("b", Status::Open, &[]),
            record("c", Status::Open, &[]),
        ];
        let report = classify(&root(), &children).expect("report");
        assert_eq!(report.percent_complete, 33);
    }

    #[test]
    fn closing_sole_dependency_unblocks_dependent() {
        let mut children = vec![
            record("a", Status::Open, &[]),
            record("b", Status::Open, &["a"]),
        ];
        let before = classify(&root(), &children).expect("before");
        children[0].status = Status::Closed;
        let after = classify(&root(), &children).expect("after");
        assert_eq!(after.done_steps, before.done_steps + 1);
        assert_eq!(before.blocked_steps, vec!["b"]);
        assert_eq!(after.ready_steps, vec!["b"]);
    }

    #[test]
    fn join_counts_bonded_children() {
        let mut bonded_one = record("x1", Status::Closed, &[]);
        bonded_one.labels = vec!["template:mol-sub".to_string()];
        let mut bonded_two = record("x2", Status::Open, &[]);
        bonded_two.labels = vec!["template:mol-sub".to_string()];
        let mut gather = record("gather", Status::Open, &["x1", "x2"]);
        gather.labels = vec![WAITS_FOR_CHILDREN.to_string(), "join:2".to_string()];

        let report = classify(&root(), &[bonded_one, bonded_two, gather]).expect("report");
        assert_eq!(
            report.joins,
            vec![JoinStatus {
                step_id: "gather".to_string(),
                expected: 2,
                completed: 1
            }]
        );
        assert!(report.blocked_steps.contains(&"gather".to_string()));
    }

    #[test]
    fn next_action_prefers_in_progress_then_ready() {
        let children = vec![
            record("a", Status::Open, &[]),
            record("b", Status::InProgress, &[]),
        ];
        let report = classify(&root(), &children);
        assert_eq!(
            next_action(report.as_ref(), &children),
            NextAction::Continue {
                step_id: "b".to_string()
            }
        );

        let children = vec![record("a", Status::Open, &[])];
        let report = classify(&root(), &children);
        assert_eq!(
            next_action(report.as_ref(), &children),
            NextAction::Start {
                step_id: "a".to_string()
            }
        );
        assert_eq!(next_action(None, &[]), NextAction::Idle);
    }
}
