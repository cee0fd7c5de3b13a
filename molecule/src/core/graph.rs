//! Structural validation of a parsed step list.
//!
//! Checks run before any record is created:
//! - refs are unique within the template
//! - every `Needs` target names a step in the same template
//! - the `Needs` graph is acyclic
//!
//! Declaration order is irrelevant; a step may need a ref declared later.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::core::types::Step;

/// One structural problem in a template's step graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum StepIssue {
    NoSteps,
    DuplicateRef { step: String },
    DanglingNeed { step: String, need: String },
    Cycle { steps: Vec<String> },
}

impl fmt::Display for StepIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepIssue::NoSteps => write!(f, "template declares no steps"),
            StepIssue::DuplicateRef { step } => write!(f, "duplicate step ref '{step}'"),
            StepIssue::DanglingNeed { step, need } => {
                write!(f, "step '{step}' needs unknown step '{need}'")
            }
            StepIssue::Cycle { steps } => {
                write!(f, "dependency cycle between steps: {}", steps.join(", "))
            }
        }
    }
}

/// Validate a parsed step list. Returns every issue found (empty on success).
pub fn validate_steps(steps: &[Step]) -> Vec<StepIssue> {
    if steps.is_empty() {
        return vec![StepIssue::NoSteps];
    }

    let mut issues = Vec::new();
    let mut needs: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut reported_dups = BTreeSet::new();

    for step in steps {
        if needs.contains_key(step.step_ref.as_str()) {
            if reported_dups.insert(step.step_ref.as_str()) {
                issues.push(StepIssue::DuplicateRef {
                    step: step.step_ref.clone(),
                });
            }
            continue;
        }
        needs.insert(step.step_ref.as_str(), BTreeSet::new());
    }

    for step in steps {
        for need in &step.needs {
            if needs.contains_key(need.as_str()) {
                if let Some(set) = needs.get_mut(step.step_ref.as_str()) {
                    set.insert(need.as_str());
                }
            } else {
                issues.push(StepIssue::DanglingNeed {
                    step: step.step_ref.clone(),
                    need: need.clone(),
                });
            }
        }
    }

    let cyclic = cyclic_refs(&needs);
    if !cyclic.is_empty() {
        issues.push(StepIssue::Cycle {
            steps: cyclic.into_iter().map(str::to_string).collect(),
        });
    }

    issues
}

/// Refs that sit on a dependency cycle, sorted.
///
/// Tarjan's strongly connected components over the `Needs` graph: a component of
/// two or more steps is a cycle, and so is a single step that needs itself. Steps
/// that only sit between cycles belong to neither and are not reported.
fn cyclic_refs<'a>(needs: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> BTreeSet<&'a str> {
    let mut scc = Components {
        needs,
        index: BTreeMap::new(),
        low: BTreeMap::new(),
        stack: Vec::new(),
        on_stack: BTreeSet::new(),
        cyclic: BTreeSet::new(),
    };
    for step in needs.keys() {
        if !scc.index.contains_key(step) {
            scc.visit(step);
        }
    }
    scc.cyclic
}

struct Components<'g, 'a> {
    needs: &'g BTreeMap<&'a str, BTreeSet<&'a str>>,
    index: BTreeMap<&'a str, usize>,
    low: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    cyclic: BTreeSet<&'a str>,
}

impl<'a> Components<'_, 'a> {
    fn visit(&mut self, step: &'a str) {
        let next = self.index.len();
        self.index.insert(step, next);
        self.low.insert(step, next);
        self.stack.push(step);
        self.on_stack.insert(step);

        let needs = self.needs;
        for &dep in needs.get(step).into_iter().flatten() {
            let reached = if !self.index.contains_key(dep) {
                self.visit(dep);
                self.low[dep]
            } else if self.on_stack.contains(dep) {
                self.index[dep]
            } else {
                continue;
            };
            if reached < self.low[step] {
                self.low.insert(step, reached);
            }
        }

        if self.low[step] != self.index[step] {
            return;
        }
        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(member);
            component.push(member);
            if member == step {
                break;
            }
        }
        let needs_itself = needs.get(step).is_some_and(|deps| deps.contains(step));
        if component.len() > 1 || needs_itself {
            self.cyclic.extend(component);
        }
    }
}

/// Render issues as a single `; `-joined message.
pub fn describe_issues(issues: &[StepIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step_ref: &str, needs: &[&str]) -> Step {
        let mut step = Step::new(step_ref);
        step.needs = needs.iter().map(|n| n.to_string()).collect();
        step
    }

    #[test]
    fn valid_chain_has_no_issues() {
        let steps = vec![
            step("review", &["implement"]),
            step("design", &[]),
            step("implement", &["design"]),
        ];
        assert!(validate_steps(&steps).is_empty());
    }

    #[test]
    fn mutual_needs_cycle_names_both_refs() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert_eq!(
            validate_steps(&steps),
            vec![StepIssue::Cycle {
                steps: vec!["a".to_string(), "b".to_string()]
            }]
        );
    }

    #[test]
    fn cycle_report_excludes_downstream_steps() {
        let steps = vec![
            step("root", &[]),
            step("x", &["root", "z"]),
            step("y", &["x"]),
            step("z", &["y"]),
            step("after", &["z"]),
        ];
        assert_eq!(
            validate_steps(&steps),
            vec![StepIssue::Cycle {
                steps: vec!["x".to_string(), "y".to_string(), "z".to_string()]
            }]
        );
    }

    #[test]
    fn step_between_two_cycles_is_not_reported() {
        let steps = vec![
            step("a", &["b"]),
            step("b", &["a"]),
            step("x", &["a"]),
            step("c", &["d", "x"]),
            step("d", &["c"]),
        ];
        assert_eq!(
            validate_steps(&steps),
            vec![StepIssue::Cycle {
                steps: ["a", "b", "c", "d"].map(String::from).to_vec()
            }]
        );
    }

    #[test]
    fn self_need_is_a_cycle() {
        let steps = vec![step("loop", &["loop"])];
        assert_eq!(
            validate_steps(&steps),
            vec![StepIssue::Cycle {
                steps: vec!["loop".to_string()]
            }]
        );
    }

    #[test]
    fn duplicates_and_dangling_needs_are_reported_once_each() {
        let steps = vec![
            step("a", &[]),
            step("a", &[]),
            step("a", &[]),
            step("b", &["ghost"]),
        ];
        assert_eq!(
            validate_steps(&steps),
            vec![
                StepIssue::DuplicateRef {
                    step: "a".to_string()
                },
                StepIssue::DanglingNeed {
                    step: "b".to_string(),
                    need: "ghost".to_string()
                },
            ]
        );
    }

    #[test]
    fn empty_step_list_is_rejected() {
        assert_eq!(validate_steps(&[]), vec![StepIssue::NoSteps]);
    }

    #[test]
    fn describe_joins_messages() {
        let message = describe_issues(&[StepIssue::Cycle {
            steps: vec!["a".to_string(), "b".to_string()],
        }]);
        assert_eq!(message, "dependency cycle between steps: a, b");
    }
}
