//! Per-worker state types.
//!
//! One `AgentState` exists for every task the engine has spawned. The
//! runtime never deletes one within a session.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::TaskStatus;

/// A question a worker asked the orchestrator.
///
/// Ids are 1-based and assigned in ask order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub text: String,
    pub asked_at: DateTime<Utc>,
    pub answer: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// A question the orchestrator asked a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: u32,
    pub text: String,
    pub asked_at: DateTime<Utc>,
    pub answer: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// Everything the orchestrator knows about one spawned worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub task_id: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    /// Final output, set on completion.
    #[serde(default)]
    pub output: String,
    /// Failure reason, set when the task fails.
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUp>,
    /// The worker's directory under `<session>/workers/`.
    pub working_dir: PathBuf,
}

impl AgentState {
    /// A freshly spawned agent in the `Running` state.
    pub fn running(task_id: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            output: String::new(),
            error: String::new(),
            questions: Vec::new(),
            follow_ups: Vec::new(),
            working_dir,
        }
    }

    /// Number of questions still waiting for an answer.
    pub fn unanswered_questions(&self) -> usize {
        self.questions.iter().filter(|q| q.answer.is_none()).count()
    }
}
