//! Workflow and task declarations.
//!
//! A `Workflow` is the semantic graph the orchestrator runs. The document
//! syntax it was loaded from does not matter past this point.

use serde::{Deserialize, Serialize};

/// A single node in the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique, stable identifier. Also names the worker directory.
    pub id: String,
    /// Tag telling the launcher which kind of worker to start.
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub description: String,
    /// Instruction template. May reference other tasks' outputs as
    /// `{task-id.output}`.
    pub prompt: String,
    /// Ids of tasks that must complete before this one is ready.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// An ordered list of tasks plus descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declaration order is significant: readiness is reported in this order.
    pub tasks: Vec<Task>,
}

impl Workflow {
    /// Look up a task by id.
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }
}

/// Lifecycle status of a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}
