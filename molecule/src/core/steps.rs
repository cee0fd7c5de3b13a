//! Permissive, line-oriented step grammar for template bodies.
//!
//! ```text
//! ## Step: <ref>[: <title>]
//! free-form instructions
//! Needs: <ref>, <ref>
//! Tier: <hint>
//! WaitsFor: all-children
//! ```
//!
//! Text before the first header is preamble. Any line that is not a header or a
//! recognized key is kept as instruction text. Parsing never fails; structural
//! checks live in [`crate::core::graph`].

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Step;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^##\s*Step:\s*([A-Za-z0-9][A-Za-z0-9_.-]*)\s*(?::\s*(.*?))?\s*$")
        .expect("step header regex")
});

static KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(needs|tier|waits[-_ ]?for)\s*:\s*(.*?)\s*$").expect("step key regex")
});

const ALL_CHILDREN: &str = "all-children";

/// Extract the ordered step list from a template body.
pub fn parse_steps(body: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut current: Option<(Step, Vec<&str>)> = None;

    for line in body.lines() {
        if let Some(caps) = HEADER_RE.captures(line.trim_end()) {
            if let Some(done) = current.take() {
                steps.push(finish(done));
            }
            let mut step = Step::new(&caps[1]);
            if let Some(title) = caps.get(2).map(|m| m.as_str()).filter(|t| !t.is_empty()) {
                step.title = title.to_string();
            }
            current = Some((step, Vec::new()));
            continue;
        }

        let Some((step, lines)) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = KEY_RE.captures(line.trim()) {
            let value = &caps[2];
            match caps[1].to_ascii_lowercase().as_str() {
                "needs" => {
                    for need in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                        if !step.needs.iter().any(|n| n == need) {
                            step.needs.push(need.to_string());
                        }
                    }
                    continue;
                }
                "tier" if !value.is_empty() => {
                    step.tier = Some(value.to_string());
                    continue;
                }
                _ if value.eq_ignore_ascii_case(ALL_CHILDREN) => {
                    step.waits_for_children = true;
                    continue;
                }
                _ => {}
            }
        }
        lines.push(line);
    }

    if let Some(done) = current.take() {
        steps.push(finish(done));
    }
    steps
}

fn finish((mut step, lines): (Step, Vec<&str>)) -> Step {
    step.instructions = lines.join("\n").trim().to_string();
    step
}

/// Render steps back into the grammar accepted by [`parse_steps`].
pub fn render_steps(preamble: &str, steps: &[Step]) -> String {
    let mut out = String::new();
    let preamble = preamble.trim();
    if !preamble.is_empty() {
        out.push_str(preamble);
        out.push_str("\n\n");
    }
    for (idx, step) in steps.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        if step.title == step.step_ref || step.title.is_empty() {
            out.push_str(&format!("## Step: {}\n", step.step_ref));
        } else {
            out.push_str(&format!("## Step: {}: {}\n", step.step_ref, step.title));
        }
        if !step.instructions.is_empty() {
            out.push_str(&step.instructions);
            out.push('\n');
        }
        if !step.needs.is_empty() {
            out.push_str(&format!("Needs: {}\n", step.needs.join(", ")));
        }
        if let Some(tier) = &step.tier {
            out.push_str(&format!("Tier: {tier}\n"));
        }
        if step.waits_for_children {
            out.push_str(&format!("WaitsFor: {ALL_CHILDREN}\n"));
        }
    }
    out
}

/// Text preceding the first step header.
pub fn preamble(body: &str) -> String {
    body.lines()
        .take_while(|line| !HEADER_RE.is_match(line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
