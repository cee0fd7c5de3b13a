//! `{{var}}` placeholder handling.
//!
//! Substitution is lenient: a placeholder with no binding is left verbatim so a
//! later pass (or a human) can still see what was expected.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("placeholder regex")
});

/// Replace bound `{{var}}` placeholders, leaving unbound ones untouched.
pub fn substitute(text: &str, bindings: &BTreeMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| match bindings.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Names of every placeholder referenced in `text`.
pub fn placeholders(text: &str) -> BTreeSet<String> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Replace literal values with `{{var}}` placeholders.
///
/// `literals` maps a literal value to the variable name that replaces it.
/// Longer literals are replaced first so a literal contained in another does
/// not split it. Empty literals are ignored.
pub fn abstract_literals(text: &str, literals: &BTreeMap<String, String>) -> String {
    let mut ordered: Vec<(&String, &String)> =
        literals.iter().filter(|(lit, _)| !lit.is_empty()).collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    // Replace into sentinel-delimited slots first so a variable name that happens
    // to contain a shorter literal is not rewritten again.
    let mut out = text.to_string();
    for (idx, (literal, _)) in ordered.iter().enumerate() {
        out = out.replace(literal.as_str(), &format!("\u{0}{idx}\u{0}"));
    }
    for (idx, (_, var)) in ordered.iter().enumerate() {
        out = out.replace(&format!("\u{0}{idx}\u{0}"), &format!("{{{{{var}}}}}"));
    }
    out
}

/// Parse `key=value` pairs (as given on the command line) into bindings.
pub fn parse_bindings<S: AsRef<str>>(pairs: &[S]) -> Result<BTreeMap<String, String>, String> {
    let mut bindings = BTreeMap::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("invalid binding {pair:?} (expected key=value)"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("invalid binding {pair:?} (empty key)"));
        }
        bindings.insert(key.to_string(), value.to_string());
    }
    Ok(bindings)
}
