//! Agent hooks: one pinned record per agent holding at most one attached instance.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::progress::{NextAction, classify, next_action};
use crate::core::provenance;
use crate::core::types::{Attachment, Kind, Phase, ProgressReport, Record, Status};
use crate::error::{MolError, Stage};
use crate::io::ledger::{
    Ledger, LedgerError, ListFilter, NewRecord, Precondition, RecordUpdate, now_rfc3339,
};

/// The agent's hook record, if one exists.
pub fn find_hook<L: Ledger>(ledger: &L, agent: &str) -> Result<Option<Record>, MolError> {
    let hooks = ledger
        .list(&ListFilter {
            assignee: Some(agent.to_string()),
            ..ListFilter::kind(Kind::Hook)
        })
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    if hooks.len() > 1 {
        warn!(agent, count = hooks.len(), "several hooks for one agent; using the first");
    }
    Ok(hooks.into_iter().next())
}

/// Find the agent's hook or create it.
pub fn ensure_hook<L: Ledger>(ledger: &L, agent: &str) -> Result<Record, MolError> {
    if let Some(hook) = find_hook(ledger, agent)? {
        return Ok(hook);
    }
    let hook = NewRecord {
        status: Status::Pinned,
        assignee: Some(agent.to_string()),
        ..NewRecord::new(Kind::Hook, format!("{agent} hook"))
    };
    let hook = ledger
        .create(hook)
        .map_err(MolError::ledger(Stage::LedgerWrite))?;
    debug!(agent, hook = %hook.id, "created hook");
    Ok(hook)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachReport {
    pub hook_id: String,
    pub instance_id: String,
    /// Instance that was on the hook before, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
}

/// Attach `instance_id` to the agent's hook, replacing whatever is there.
#[instrument(skip_all, fields(agent = %agent, instance = instance_id))]
pub fn attach<L: Ledger>(
    ledger: &L,
    agent: &str,
    instance_id: &str,
) -> Result<AttachReport, MolError> {
    attach_with(ledger, agent, instance_id, None)
}

/// Attach only if the hook is clear. The check and the write are one ledger
/// operation, so two concurrent callers cannot both win.
#[instrument(skip_all, fields(agent = %agent, instance = instance_id))]
pub fn attach_exclusive<L: Ledger>(
    ledger: &L,
    agent: &str,
    instance_id: &str,
) -> Result<AttachReport, MolError> {
    attach_with(ledger, agent, instance_id, Some(Precondition::AttachmentClear))
}

fn attach_with<L: Ledger>(
    ledger: &L,
    agent: &str,
    instance_id: &str,
    precondition: Option<Precondition>,
) -> Result<AttachReport, MolError> {
    ledger
        .show(instance_id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let hook = ensure_hook(ledger, agent)?;
    let replaced = hook.attachment.as_ref().map(|a| a.instance_id.clone());

    let mut update = RecordUpdate::attach(Attachment {
        instance_id: instance_id.to_string(),
        attached_at: now_rfc3339(),
    });
    update.precondition = precondition;
    match ledger.update(&hook.id, update) {
        Ok(_) => {}
        Err(LedgerError::PreconditionFailed { .. }) => {
            // Re-read so the error names the instance that won.
            let attached = ledger
                .show(&hook.id)
                .ok()
                .and_then(|h| h.attachment)
                .map(|a| a.instance_id)
                .unwrap_or_else(|| "another instance".to_string());
            return Err(MolError::Collision {
                hook: hook.id,
                attached,
            });
        }
        Err(err) => return Err(MolError::ledger(Stage::LedgerWrite)(err)),
    }

    if let Some(previous) = &replaced
        && previous != instance_id
    {
        info!(%previous, "replaced attached instance");
    }
    info!(hook = %hook.id, "attached");
    Ok(AttachReport {
        hook_id: hook.id,
        instance_id: instance_id.to_string(),
        replaced: replaced.filter(|p| p != instance_id),
    })
}

/// Fail with [`MolError::Collision`] when the agent's hook holds something.
pub fn collision_check<L: Ledger>(ledger: &L, agent: &str) -> Result<(), MolError> {
    let Some(hook) = find_hook(ledger, agent)? else {
        return Ok(());
    };
    match hook.attachment {
        Some(attachment) => Err(MolError::Collision {
            hook: hook.id,
            attached: attachment.instance_id,
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetachOutcome {
    Detached { hook_id: String, instance_id: String },
    AlreadyClear { agent: String },
}

/// Clear the agent's hook. Clearing an empty (or missing) hook is a no-op.
#[instrument(skip_all, fields(agent = %agent))]
pub fn detach<L: Ledger>(ledger: &L, agent: &str) -> Result<DetachOutcome, MolError> {
    let hook = find_hook(ledger, agent)?;
    let Some((hook, attachment)) = hook.and_then(|h| h.attachment.clone().map(|a| (h, a))) else {
        debug!("hook already clear");
        return Ok(DetachOutcome::AlreadyClear {
            agent: agent.to_string(),
        });
    };
    ledger
        .update(&hook.id, RecordUpdate::detach())
        .map_err(MolError::ledger(Stage::LedgerWrite))?;
    info!(hook = %hook.id, instance = %attachment.instance_id, "detached");
    Ok(DetachOutcome::Detached {
        hook_id: hook.id,
        instance_id: attachment.instance_id,
    })
}

/// What the agent's hook currently holds.
pub fn attachment<L: Ledger>(ledger: &L, agent: &str) -> Result<Option<Attachment>, MolError> {
    Ok(find_hook(ledger, agent)?.and_then(|h| h.attachment))
}

/// Detach every hook holding `instance_id`. Returns the cleared hook ids.
pub fn detach_holders<L: Ledger>(ledger: &L, instance_id: &str) -> Result<Vec<String>, MolError> {
    let hooks = ledger
        .list(&ListFilter::kind(Kind::Hook))
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let mut cleared = Vec::new();
    for hook in hooks {
        if hook
            .attachment
            .as_ref()
            .is_none_or(|a| a.instance_id != instance_id)
        {
            continue;
        }
        ledger
            .update(&hook.id, RecordUpdate::detach())
            .map_err(MolError::ledger(Stage::LedgerWrite))?;
        debug!(hook = %hook.id, instance_id, "detached holder");
        cleared.push(hook.id);
    }
    Ok(cleared)
}

/// Read-only answer to "what is on this agent's hook?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub agent: String,
    pub has_work: bool,
    pub hook_id: Option<String>,
    pub attached_instance: Option<String>,
    pub attached_at: Option<String>,
    pub is_ephemeral: bool,
    pub progress: Option<ProgressReport>,
    pub next_action: NextAction,
}

/// Hook status with progress of the attached instance. Never writes.
#[instrument(skip_all, fields(agent = %agent))]
pub fn status<L: Ledger>(ledger: &L, agent: &str) -> Result<StatusReport, MolError> {
    let hook = find_hook(ledger, agent)?;
    let hook_id = hook.as_ref().map(|h| h.id.clone());
    let Some(attached) = hook.and_then(|h| h.attachment) else {
        return Ok(StatusReport {
            agent: agent.to_string(),
            has_work: false,
            hook_id,
            attached_instance: None,
            attached_at: None,
            is_ephemeral: false,
            progress: None,
            next_action: NextAction::Idle,
        });
    };

    let root = ledger
        .show(&attached.instance_id)
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let children = ledger
        .list(&ListFilter::children_of(&root.id))
        .map_err(MolError::ledger(Stage::LedgerRead))?;
    let progress = classify(&root, &children);
    let next_action = match &progress {
        Some(report) => next_action(Some(report), &children),
        // A bare record on the hook is the work itself.
        None if root.is_closed() => NextAction::Complete,
        None => NextAction::Start {
            step_id: root.id.clone(),
        },
    };

    Ok(StatusReport {
        agent: agent.to_string(),
        has_work: true,
        hook_id,
        attached_instance: Some(attached.instance_id),
        attached_at: Some(attached.attached_at),
        is_ephemeral: provenance::phase_of(&root) == Some(Phase::Ephemeral),
        progress,
        next_action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ledger::MemoryLedger;

    fn ledger_with(titles: &[&str]) -> (MemoryLedger, Vec<String>) {
        let ledger = MemoryLedger::default();
        let ids = titles
            .iter()
            .map(|t| ledger.create(NewRecord::new(Kind::Epic, *t)).expect("create").id)
            .collect();
        (ledger, ids)
    }

    #[test]
    fn ensure_hook_is_stable_per_agent() {
        let ledger = MemoryLedger::default();
        let first = ensure_hook(&ledger, "alice").expect("hook");
        let second = ensure_hook(&ledger, "alice").expect("hook");
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, Status::Pinned);
        assert_ne!(ensure_hook(&ledger, "bob").expect("hook").id, first.id);
    }

    #[test]
    fn attach_replaces_and_reports_previous() {
        let (ledger, ids) = ledger_with(&["a", "b"]);
        let first = attach(&ledger, "alice", &ids[0]).expect("attach");
        assert_eq!(first.replaced, None);
        let second = attach(&ledger, "alice", &ids[1]).expect("attach");
        assert_eq!(second.replaced.as_deref(), Some(ids[0].as_str()));
        assert_eq!(
            attachment(&ledger, "alice").expect("attachment").map(|a| a.instance_id),
            Some(ids[1].clone())
        );
    }

    /// Two exclusive attaches: exactly one wins.
    #[test]
    fn exclusive_attach_collides() {
        let (ledger, ids) = ledger_with(&["a", "b"]);
        attach_exclusive(&ledger, "alice", &ids[0]).expect("first wins");
        let err = attach_exclusive(&ledger, "alice", &ids[1]).expect_err("second loses");
        assert!(matches!(err, MolError::Collision { ref attached, .. } if attached == &ids[0]));
        assert!(matches!(
            collision_check(&ledger, "alice"),
            Err(MolError::Collision { .. })
        ));
        assert!(collision_check(&ledger, "bob").is_ok());
    }

    #[test]
    fn attach_unknown_instance_is_not_found() {
        let ledger = MemoryLedger::default();
        let err = attach(&ledger, "alice", "ghost").expect_err("missing");
        assert!(matches!(err, MolError::NotFound { .. }));
        assert!(find_hook(&ledger, "alice").expect("find").is_none());
    }

    #[test]
    fn detach_is_idempotent() {
        let (ledger, ids) = ledger_with(&["a"]);
        attach(&ledger, "alice", &ids[0]).expect("attach");
        assert!(matches!(
            detach(&ledger, "alice").expect("detach"),
            DetachOutcome::Detached { ref instance_id, .. } if instance_id == &ids[0]
        ));
        assert_eq!(
            detach(&ledger, "alice").expect("again"),
            DetachOutcome::AlreadyClear {
                agent: "alice".to_string()
            }
        );
        assert_eq!(
            detach(&ledger, "nobody").expect("no hook"),
            DetachOutcome::AlreadyClear {
                agent: "nobody".to_string()
            }
        );
    }

    #[test]
    fn detach_holders_clears_every_hook_on_instance() {
        let (ledger, ids) = ledger_with(&["a", "b"]);
        attach(&ledger, "alice", &ids[0]).expect("attach");
        attach(&ledger, "bob", &ids[0]).expect("attach");
        attach(&ledger, "carol", &ids[1]).expect("attach");
        let cleared = detach_holders(&ledger, &ids[0]).expect("detach");
        assert_eq!(cleared.len(), 2);
        assert!(attachment(&ledger, "alice").expect("a").is_none());
        assert!(attachment(&ledger, "carol").expect("c").is_some());
    }

    #[test]
    fn status_is_idle_without_attachment() {
        let ledger = MemoryLedger::default();
        let report = status(&ledger, "alice").expect("status");
        assert!(!report.has_work);
        assert_eq!(report.next_action, NextAction::Idle);
        assert!(find_hook(&ledger, "alice").expect("find").is_none());
    }

    #[test]
    fn status_reports_first_ready_step() {
        let (ledger, ids) = ledger_with(&["root"]);
        let first = ledger
            .create(NewRecord {
                parent: Some(ids[0].clone()),
                ..NewRecord::new(Kind::Task, "first")
            })
            .expect("first");
        ledger
            .create(NewRecord {
                parent: Some(ids[0].clone()),
                depends_on: vec![first.id.clone()],
                ..NewRecord::new(Kind::Task, "second")
            })
            .expect("second");
        attach(&ledger, "alice", &ids[0]).expect("attach");

        let report = status(&ledger, "alice").expect("status");
        assert!(report.has_work);
        assert!(!report.is_ephemeral);
        assert_eq!(report.progress.as_ref().map(|p| p.total_steps), Some(2));
        assert_eq!(
            report.next_action,
            NextAction::Start {
                step_id: first.id.clone()
            }
        );
    }
}
