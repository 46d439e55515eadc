//! Prompt template interpolation.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    // Task ids never contain braces or whitespace.
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([^{}\s]+)\.output\}").expect("placeholder pattern must be a valid regex")
    })
}

/// Replace every `{task-id.output}` in `template` with that task's output.
///
/// Matching is case-sensitive. Placeholders naming a task without an output
/// are left verbatim. Text inserted from an output is not re-scanned.
pub fn interpolate(template: &str, outputs: &BTreeMap<String, String>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| match outputs.get(&caps[1]) {
            Some(output) => output.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Task ids referenced by placeholders in `template`, in order of first
/// appearance.
pub fn referenced_tasks(template: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in placeholder().captures_iter(template) {
        let id = caps[1].to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}
