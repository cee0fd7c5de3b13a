//! Human-readable text rendering with embedded minijinja templates.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::digest::Digest;
use crate::core::types::ProgressReport;

const DIGEST_TEMPLATE: &str = include_str!("templates/digest.md");
const PROGRESS_TEMPLATE: &str = include_str!("templates/progress.txt");
const STATUS_TEMPLATE: &str = include_str!("templates/status.txt");
const NOTIFY_TEMPLATE: &str = include_str!("templates/notify.txt");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.add_template("digest", DIGEST_TEMPLATE)
        .expect("digest template should be valid");
    env.add_template("progress", PROGRESS_TEMPLATE)
        .expect("progress template should be valid");
    env.add_template("status", STATUS_TEMPLATE)
        .expect("status template should be valid");
    env.add_template("notify", NOTIFY_TEMPLATE)
        .expect("notify template should be valid");
    env
});

/// Description body of a digest record.
pub fn render_digest(digest: &Digest) -> Result<String> {
    let rendered = ENGINE.get_template("digest")?.render(context! {
        digest => digest,
        outcome => digest.outcome(),
    })?;
    Ok(rendered.trim_end().to_string())
}

pub fn render_progress(report: &ProgressReport) -> Result<String> {
    let rendered = ENGINE
        .get_template("progress")?
        .render(context! { p => report })?;
    Ok(rendered.trim_end().to_string())
}

/// Status view; `view` must serialize with the fields the status template reads.
pub fn render_status<S: Serialize>(view: &S, hint: &str) -> Result<String> {
    let rendered = ENGINE.get_template("status")?.render(context! {
        s => view,
        hint => hint,
    })?;
    Ok(rendered.trim_end().to_string())
}

/// Message injected into an agent session after work is slung onto its hook.
pub fn render_notify(agent: &str, instance: &str, template: Option<&str>) -> Result<String> {
    let rendered = ENGINE.get_template("notify")?.render(context! {
        agent => agent,
        instance => instance,
        template => template,
    })?;
    Ok(rendered.trim().to_string())
}
