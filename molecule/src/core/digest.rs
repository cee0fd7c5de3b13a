//! Digest composition for squashed instances.

use serde::Serialize;

use crate::core::provenance::{self, DIGEST_LABEL, DIGEST_OF_LABEL, DIGEST_TEMPLATE_LABEL};
use crate::core::types::{Kind, Phase, ProgressReport, Record};

/// Condensed, immutable summary of one instance execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Digest {
    pub source_instance: String,
    pub source_title: String,
    pub template_id: Option<String>,
    pub phase: Phase,
    pub agent: Option<String>,
    pub summary: String,
    pub squashed_at: String,
    pub total_steps: usize,
    pub done_steps: usize,
    pub complete: bool,
}

impl Digest {
    /// Compose a digest. An instance with no children counts as zero of zero steps.
    pub fn compose(
        root: &Record,
        phase: Phase,
        progress: Option<&ProgressReport>,
        agent: Option<&str>,
        summary: &str,
        now: &str,
    ) -> Self {
        let (total, done) = progress.map_or((0, 0), |p| (p.total_steps, p.done_steps));
        Self {
            source_instance: root.id.clone(),
            source_title: root.title.clone(),
            template_id: provenance::template_of(root).map(str::to_string),
            phase,
            agent: agent.map(str::to_string),
            summary: summary.trim().to_string(),
            squashed_at: now.to_string(),
            total_steps: total,
            done_steps: done,
            complete: total > 0 && done == total,
        }
    }

    pub fn title(&self) -> String {
        format!("Digest: {}", self.source_instance)
    }

    pub fn outcome(&self) -> &'static str {
        if self.complete { "complete" } else { "partial" }
    }

    /// Labels for a freshly created digest record.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![
            DIGEST_LABEL.to_string(),
            provenance::label(DIGEST_OF_LABEL, &self.source_instance),
            provenance::phase_label(self.phase),
        ];
        if let Some(template) = &self.template_id {
            labels.push(provenance::label(DIGEST_TEMPLATE_LABEL, template));
        }
        labels
    }
}

/// Digest id already recorded for an instance root, if it was squashed.
pub fn existing_digest_id(root: &Record) -> Option<&str> {
    if root.kind == Kind::Digest {
        return Some(root.id.as_str());
    }
    root.label_value(DIGEST_LABEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Status;

    fn root() -> Record {
        Record {
            id: "root-1".to_string(),
            title: "Review auth".to_string(),
            description: String::new(),
            kind: Kind::Epic,
            status: Status::Open,
            assignee: None,
            parent: None,
            depends_on: Vec::new(),
            labels: vec![
                "template:mol-review".to_string(),
                "phase:durable".to_string(),
            ],
            attachment: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn composes_from_progress() {
        let progress = ProgressReport {
            root_id: "root-1".to_string(),
            root_title: "Review auth".to_string(),
            template_id: Some("mol-review".to_string()),
            total_steps: 3,
            done_steps: 3,
            in_progress_steps: 0,
            ready_steps: Vec::new(),
            blocked_steps: Vec::new(),
            percent_complete: 100,
            complete: true,
            joins: Vec::new(),
        };
        let digest = Digest::compose(
            &root(),
            Phase::Durable,
            Some(&progress),
            Some("alice"),
            "  done  ",
            "2026-02-01T00:00:00Z",
        );
        assert_eq!(digest.title(), "Digest: root-1");
        assert_eq!(digest.summary, "done");
        assert_eq!(digest.outcome(), "complete");
        assert_eq!(
            digest.labels(),
            vec![
                "digest",
                "digest-of:root-1",
                "phase:durable",
                "digest-template:mol-review"
            ]
        );
    }

    #[test]
    fn missing_progress_is_partial() {
        let digest = Digest::compose(&root(), Phase::Durable, None, None, "", "now");
        assert_eq!(digest.outcome(), "partial");
        assert_eq!(digest.total_steps, 0);
    }

    #[test]
    fn finds_recorded_digest() {
        let mut squashed = root();
        assert_eq!(existing_digest_id(&squashed), None);
        squashed.labels.push("digest:mol-9".to_string());
        assert_eq!(existing_digest_id(&squashed), Some("mol-9"));
        squashed.kind = Kind::Digest;
        assert_eq!(existing_digest_id(&squashed), Some("root-1"));
    }
}
