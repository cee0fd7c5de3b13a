//! Provenance and phase markers written onto instance records.
//!
//! Step children carry a trailing block in their description:
//!
//! ```text
//! ---
//! instantiated_from: <template-id>
//! step: <ref>
//! ```
//!
//! Roots and children carry labels (`template:<id>`, `phase:<phase>`, `tier:<hint>`,
//! `waits-for:all-children`, `ref:<other>`). Everything here is string shaping only.

use crate::core::types::{Phase, Record};

pub const INSTANTIATED_FROM: &str = "instantiated_from";
pub const STEP_KEY: &str = "step";
const BLOCK_RULE: &str = "---";

pub const TEMPLATE_LABEL: &str = "template";
pub const PHASE_LABEL: &str = "phase";
pub const TIER_LABEL: &str = "tier";
pub const REF_LABEL: &str = "ref";
pub const JOIN_LABEL: &str = "join";
pub const DIGEST_LABEL: &str = "digest";
pub const DIGEST_OF_LABEL: &str = "digest-of";
pub const DIGEST_TEMPLATE_LABEL: &str = "digest-template";
pub const WAITS_FOR_CHILDREN: &str = "waits-for:all-children";
pub const SQUASHED: &str = "squashed";
pub const BURNED: &str = "burned";
pub const DISCARDED: &str = "discarded";

/// `prefix:value` label.
pub fn label(prefix: &str, value: &str) -> String {
    format!("{prefix}:{value}")
}

pub fn phase_label(phase: Phase) -> String {
    label(PHASE_LABEL, phase.as_str())
}

/// Append the provenance block to a rendered step description.
pub fn with_provenance(instructions: &str, template_id: &str, step_ref: &str) -> String {
    let body = instructions.trim_end();
    let block = format!("{BLOCK_RULE}\n{INSTANTIATED_FROM}: {template_id}\n{STEP_KEY}: {step_ref}");
    if body.is_empty() {
        block
    } else {
        format!("{body}\n\n{block}")
    }
}

/// Template id and step ref recorded in a description, if present.
pub fn extract(description: &str) -> Option<(String, Option<String>)> {
    let mut template = None;
    let mut step = None;
    for line in description.lines().rev() {
        let line = line.trim();
        if line == BLOCK_RULE {
            break;
        }
        if let Some(value) = marker_value(line, INSTANTIATED_FROM) {
            template = Some(value.to_string());
        } else if let Some(value) = marker_value(line, STEP_KEY) {
            step = Some(value.to_string());
        }
    }
    template.map(|t| (t, step))
}

/// Description with the provenance block removed.
pub fn strip(description: &str) -> String {
    if extract(description).is_none() {
        return description.trim_end().to_string();
    }
    match description.rfind(&format!("\n{BLOCK_RULE}\n")) {
        Some(idx) => description[..idx].trim_end().to_string(),
        None if description.starts_with(BLOCK_RULE) => String::new(),
        None => description.trim_end().to_string(),
    }
}

fn marker_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Phase recorded on an instance root.
pub fn phase_of(record: &Record) -> Option<Phase> {
    match record.label_value(PHASE_LABEL)? {
        "durable" => Some(Phase::Durable),
        "ephemeral" => Some(Phase::Ephemeral),
        _ => None,
    }
}

/// Template an instance root was created from.
pub fn template_of(record: &Record) -> Option<&str> {
    record.label_value(TEMPLATE_LABEL)
}

/// `join:<n>` expected-children counter on a fan-in step.
pub fn join_expected(record: &Record) -> Option<usize> {
    record.label_value(JOIN_LABEL)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_round_trips_through_description() {
        let description = with_provenance("Write the code.\n", "mol-review", "implement");
        assert_eq!(
            description,
            "Write the code.\n\n---\ninstantiated_from: mol-review\nstep: implement"
        );
        assert_eq!(
            extract(&description),
            Some(("mol-review".to_string(), Some("implement".to_string())))
        );
        assert_eq!(strip(&description), "Write the code.");
    }

    #[test]
    fn empty_instructions_yield_bare_block() {
        let description = with_provenance("", "mol-a", "x");
        assert!(description.starts_with("---\n"));
        assert_eq!(strip(&description), "");
    }

    #[test]
    fn description_without_marker_is_untouched() {
        let text = "Plain text\n---\nnot a marker";
        assert_eq!(extract(text), None);
        assert_eq!(strip(text), "Plain text\n---\nnot a marker");
    }
}
