//! Path-convention classification.
//!
//! A path is interesting only if it sits inside a `worker-<task-id>`
//! directory, either directly or one subdirectory down. What it means is
//! decided by `RULES`, checked in order; the first match wins.

use std::path::{Component, Path};

use fleet_contracts::{
    event::EventKind,
    layout::{
        COMPLETE_MARKER, FOLLOWUP_DIR, MESSAGES_DIR, QUESTIONS_DIR, STATUS_FILE,
        WORKER_DIR_PREFIX,
    },
};

/// Where a file must sit relative to its worker directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Directly inside `worker-<id>/`.
    WorkerRoot,
    /// Inside the named subdirectory of `worker-<id>/`.
    Subdir(&'static str),
}

/// How a file name is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Exact(&'static str),
    PrefixSuffix(&'static str, &'static str),
}

impl NameMatch {
    fn matches(self, name: &str) -> bool {
        match self {
            NameMatch::Exact(expected) => name == expected,
            NameMatch::PrefixSuffix(prefix, suffix) => {
                name.len() > prefix.len() + suffix.len()
                    && name.starts_with(prefix)
                    && name.ends_with(suffix)
            }
        }
    }
}

/// One row of the classification table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub location: Location,
    pub name: NameMatch,
    pub kind: EventKind,
}

pub const RULES: &[Rule] = &[
    Rule {
        location: Location::Subdir(QUESTIONS_DIR),
        name: NameMatch::PrefixSuffix("q-", ".txt"),
        kind: EventKind::QuestionAsked,
    },
    Rule {
        location: Location::Subdir(QUESTIONS_DIR),
        name: NameMatch::PrefixSuffix("a-", ".txt"),
        kind: EventKind::QuestionAnswered,
    },
    Rule {
        location: Location::Subdir(FOLLOWUP_DIR),
        name: NameMatch::PrefixSuffix("q-", ".txt"),
        kind: EventKind::FollowUpAsked,
    },
    Rule {
        location: Location::Subdir(FOLLOWUP_DIR),
        name: NameMatch::PrefixSuffix("a-", ".txt"),
        kind: EventKind::FollowUpAnswered,
    },
    Rule {
        location: Location::WorkerRoot,
        name: NameMatch::Exact(COMPLETE_MARKER),
        kind: EventKind::TaskCompleted,
    },
    Rule {
        location: Location::WorkerRoot,
        name: NameMatch::Exact(STATUS_FILE),
        kind: EventKind::StatusUpdate,
    },
    Rule {
        location: Location::Subdir(MESSAGES_DIR),
        name: NameMatch::PrefixSuffix("", ".json"),
        kind: EventKind::OperationRequest,
    },
];

/// Classify `path` into `(task_id, kind)`, or `None` if it carries no
/// meaning. Hidden names (leading `.`) are always ignored; atomic writers
/// use them for temp files.
pub fn classify(path: &Path) -> Option<(String, EventKind)> {
    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let worker_idx = parts
        .iter()
        .rposition(|p| p.starts_with(WORKER_DIR_PREFIX))?;
    let task_id = parts[worker_idx].strip_prefix(WORKER_DIR_PREFIX)?;
    if task_id.is_empty() {
        return None;
    }

    let (location, name) = match &parts[worker_idx + 1..] {
        [name] => (Location::WorkerRoot, *name),
        [subdir, name] => (Location::Subdir(subdir_const(subdir)?), *name),
        _ => return None,
    };
    if name.starts_with('.') {
        return None;
    }

    RULES
        .iter()
        .find(|rule| rule.location == location && rule.name.matches(name))
        .map(|rule| (task_id.to_string(), rule.kind))
}

fn subdir_const(name: &str) -> Option<&'static str> {
    [QUESTIONS_DIR, FOLLOWUP_DIR, MESSAGES_DIR]
        .into_iter()
        .find(|known| *known == name)
}
