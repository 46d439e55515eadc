//! Domain events.
//!
//! The monitor produces `FileEvent`s from filesystem notifications; the
//! session store appends its own lifecycle events to the same log type.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened. Monitor-classified kinds and store lifecycle kinds share
/// one enum so the session event log has a single shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    QuestionAsked,
    QuestionAnswered,
    FollowUpAsked,
    FollowUpAnswered,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    StatusUpdate,
    OperationRequest,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::QuestionAsked => "question_asked",
            EventKind::QuestionAnswered => "question_answered",
            EventKind::FollowUpAsked => "followup_asked",
            EventKind::FollowUpAnswered => "followup_answered",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::StatusUpdate => "status_update",
            EventKind::OperationRequest => "operation_request",
        };
        f.write_str(s)
    }
}

/// A typed event concerning one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: EventKind,
    pub task_id: String,
    /// The artifact that triggered the event. `None` for events the store
    /// records on its own.
    pub path: Option<PathBuf>,
    pub time: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(kind: EventKind, task_id: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            path,
            time: Utc::now(),
        }
    }
}
