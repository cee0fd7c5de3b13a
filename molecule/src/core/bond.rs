//! The bond table: how two phase-typed operands combine.
//!
//! | bond      | Template            | Durable           | Ephemeral         |
//! |-----------|---------------------|-------------------|-------------------|
//! | Template  | compound template   | spawn under host  | spawn under host  |
//! | Durable   | (symmetric)         | dependency edge   | reference edge    |
//! | Ephemeral | (symmetric)         | (symmetric)       | reference edge    |
//!
//! Planning is pure. The orchestration layer in [`crate::phase`] executes a plan
//! against the ledger.

use serde::Serialize;

use crate::core::graph::{StepIssue, validate_steps};
use crate::core::steps::{parse_steps, preamble, render_steps};
use crate::core::types::{Phase, Scope, Template};

/// Phase of one bond operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandKind {
    Template,
    Durable,
    Ephemeral,
}

impl OperandKind {
    pub fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::Durable => OperandKind::Durable,
            Phase::Ephemeral => OperandKind::Ephemeral,
        }
    }
}

/// Which operand a plan refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// What a bond does, decided from operand phases alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum BondPlan {
    /// Two templates fuse into a new template.
    CompoundTemplate,
    /// Instantiate `template` as a new instance linked under `host`.
    Spawn {
        template: Side,
        host: Side,
        phase: Phase,
    },
    /// `dependent` root gains a dependency on `blocker` root.
    DependencyEdge { blocker: Side, dependent: Side },
    /// Cross-reference between two roots; neither changes phase.
    ReferenceEdge,
}

impl BondPlan {
    /// Whether the plan creates a new instance.
    pub fn creates_instance(self) -> bool {
        matches!(self, BondPlan::Spawn { .. })
    }
}

/// Decide the bond for two operands.
///
/// `force` overrides the created phase on spawn rows only and is ignored by
/// linking rows.
pub fn plan_bond(left: OperandKind, right: OperandKind, force: Option<Phase>) -> BondPlan {
    let spawn = |template: Side, host: Side, host_phase: Phase| BondPlan::Spawn {
        template,
        host,
        phase: force.unwrap_or(host_phase),
    };

    match (left, right) {
        (OperandKind::Template, OperandKind::Template) => BondPlan::CompoundTemplate,
        (OperandKind::Template, OperandKind::Durable) => {
            spawn(Side::Left, Side::Right, Phase::Durable)
        }
        (OperandKind::Durable, OperandKind::Template) => {
            spawn(Side::Right, Side::Left, Phase::Durable)
        }
        (OperandKind::Template, OperandKind::Ephemeral) => {
            spawn(Side::Left, Side::Right, Phase::Ephemeral)
        }
        (OperandKind::Ephemeral, OperandKind::Template) => {
            spawn(Side::Right, Side::Left, Phase::Ephemeral)
        }
        (OperandKind::Durable, OperandKind::Durable) => BondPlan::DependencyEdge {
            blocker: Side::Left,
            dependent: Side::Right,
        },
        (OperandKind::Durable | OperandKind::Ephemeral, OperandKind::Durable | OperandKind::Ephemeral) => {
            BondPlan::ReferenceEdge
        }
    }
}

/// Fuse two templates by concatenating their step sets.
///
/// The compound id is `<left>+<right>`. Refs are not renamed, so a ref declared by
/// both operands is reported as a duplicate.
pub fn compound_template(left: &Template, right: &Template) -> Result<Template, Vec<StepIssue>> {
    let mut steps = parse_steps(&left.description);
    steps.extend(parse_steps(&right.description));
    let issues = validate_steps(&steps);
    if !issues.is_empty() {
        return Err(issues);
    }

    let intro = [preamble(&left.description), preamble(&right.description)]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Template {
        id: format!("{}+{}", left.id, right.id),
        title: format!("{} + {}", left.title, right.title),
        description: render_steps(&intro, &steps),
        source: Scope::Project,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [OperandKind; 3] = [
        OperandKind::Template,
        OperandKind::Durable,
        OperandKind::Ephemeral,
    ];

    fn mirror(side: Side) -> Side {
        match side {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn template(id: &str, body: &str) -> Template {
        Template {
            id: id.to_string(),
            title: id.to_uppercase(),
            description: body.to_string(),
            source: Scope::Builtin,
        }
    }

    #[test]
    fn table_is_symmetric_up_to_side_swap() {
        for left in KINDS {
            for right in KINDS {
                let forward = plan_bond(left, right, None);
                let backward = plan_bond(right, left, None);
                let swapped = match backward {
                    BondPlan::Spawn {
                        template,
                        host,
                        phase,
                    } => BondPlan::Spawn {
                        template: mirror(template),
                        host: mirror(host),
                        phase,
                    },
                    BondPlan::DependencyEdge { .. } => forward,
                    other => other,
                };
                assert_eq!(forward, swapped, "{left:?} x {right:?}");
            }
        }
    }

    #[test]
    fn only_template_with_instance_creates_an_instance() {
        for left in KINDS {
            for right in KINDS {
                let creates = plan_bond(left, right, None).creates_instance();
                let expected = (left == OperandKind::Template) != (right == OperandKind::Template);
                assert_eq!(creates, expected, "{left:?} x {right:?}");
            }
        }
    }

    #[test]
    fn spawn_inherits_host_phase_unless_forced() {
        assert_eq!(
            plan_bond(OperandKind::Ephemeral, OperandKind::Template, None),
            BondPlan::Spawn {
                template: Side::Right,
                host: Side::Left,
                phase: Phase::Ephemeral
            }
        );
        assert_eq!(
            plan_bond(
                OperandKind::Template,
                OperandKind::Ephemeral,
                Some(Phase::Durable)
            ),
            BondPlan::Spawn {
                template: Side::Left,
                host: Side::Right,
                phase: Phase::Durable
            }
        );
    }

    #[test]
    fn force_never_changes_linking_rows() {
        for force in [None, Some(Phase::Durable), Some(Phase::Ephemeral)] {
            assert_eq!(
                plan_bond(OperandKind::Durable, OperandKind::Ephemeral, force),
                BondPlan::ReferenceEdge
            );
            assert_eq!(
                plan_bond(OperandKind::Durable, OperandKind::Durable, force),
                BondPlan::DependencyEdge {
                    blocker: Side::Left,
                    dependent: Side::Right
                }
            );
        }
    }

    #[test]
    fn compound_concatenates_steps() {
        let left = template("mol-a", "Intro A\n## Step: one\n## Step: two\nNeeds: one\n");
        let right = template("mol-b", "## Step: three\nNeeds: two\n");
        let compound = compound_template(&left, &right).expect("compound");
        assert_eq!(compound.id, "mol-a+mol-b");
        assert_eq!(compound.title, "MOL-A + MOL-B");
        let refs: Vec<String> = parse_steps(&compound.description)
            .into_iter()
            .map(|s| s.step_ref)
            .collect();
        assert_eq!(refs, vec!["one", "two", "three"]);
        assert!(compound.description.starts_with("Intro A"));
    }

    #[test]
    fn compound_rejects_shared_refs() {
        let left = template("mol-a", "## Step: build\n");
        let right = template("mol-b", "## Step: build\n");
        let issues = compound_template(&left, &right).expect_err("duplicate");
        assert_eq!(
            issues,
            vec![StepIssue::DuplicateRef {
                step: "build".to_string()
            }]
        );
    }
}
