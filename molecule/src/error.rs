//! Error taxonomy for molecule operations.
//!
//! Library operations return [`MolError`]. File and CLI plumbing stays on
//! `anyhow`. No-op outcomes (nothing attached, already squashed) are values of the
//! outcome enums in [`crate::phase`] and [`crate::hook`], never errors.

use std::fmt;

use thiserror::Error;

use crate::core::graph::{StepIssue, describe_issues};
use crate::io::ledger::LedgerError;

/// Which phase of an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Validate,
    Instantiate,
    LedgerWrite,
    LedgerRead,
    Catalog,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Parse => "parse",
            Stage::Validate => "validate",
            Stage::Instantiate => "instantiate",
            Stage::LedgerWrite => "ledger write",
            Stage::LedgerRead => "ledger read",
            Stage::Catalog => "catalog",
        })
    }
}

#[derive(Debug, Error)]
pub enum MolError {
    #[error("validate failed for template {template}: {}", describe_issues(.issues))]
    Validation {
        template: String,
        issues: Vec<StepIssue>,
    },

    #[error("{stage} failed: {what} {id} not found")]
    NotFound {
        stage: Stage,
        what: &'static str,
        id: String,
    },

    #[error("hook {hook} already holds {attached}; pass --force to replace it")]
    Collision { hook: String, attached: String },

    #[error("{stage} failed: {source}")]
    Ledger {
        stage: Stage,
        #[source]
        source: LedgerError,
    },

    #[error("bond rejected: {0}")]
    InvalidBond(String),

    #[error("cannot burn durable instance {instance}; squash it to record disposal")]
    BurnDurable { instance: String },

    #[error("{id} is not an instance (it has no children)")]
    NotAnInstance { id: String },

    #[error("catalog failed: {0}")]
    Catalog(String),

    #[error("render failed: {0}")]
    Render(String),
}

impl MolError {
    /// Wrap a ledger failure, turning a missing record into [`MolError::NotFound`].
    pub fn ledger(stage: Stage) -> impl FnOnce(LedgerError) -> MolError {
        move |source| match source {
            LedgerError::NotFound(id) => MolError::NotFound {
                stage,
                what: "record",
                id,
            },
            source => MolError::Ledger { stage, source },
        }
    }

    pub fn template_not_found(id: &str) -> Self {
        MolError::NotFound {
            stage: Stage::Catalog,
            what: "template",
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_stage() {
        let err = MolError::ledger(Stage::LedgerWrite)(LedgerError::Rejected {
            record: "mol-1".to_string(),
            field: "depends_on".to_string(),
            reason: "unknown record mol-9".to_string(),
        });
        assert!(err.to_string().starts_with("ledger write failed:"));
        assert!(err.to_string().contains("mol-1.depends_on"));

        let err = MolError::Validation {
            template: "mol-x".to_string(),
            issues: vec![StepIssue::Cycle {
                steps: vec!["a".to_string(), "b".to_string()],
            }],
        };
        assert_eq!(
            err.to_string(),
            "validate failed for template mol-x: dependency cycle between steps: a, b"
        );
    }

    #[test]
    fn missing_record_maps_to_not_found() {
        let err = MolError::ledger(Stage::LedgerRead)(LedgerError::NotFound("mol-7".to_string()));
        assert!(matches!(err, MolError::NotFound { ref id, .. } if id == "mol-7"));
    }
}
