//! Error types shared by every fleet crate.
//!
//! All fallible orchestration operations return `FleetResult<T>`. Variants
//! carry the task or path they concern so log lines stay actionable without
//! a backtrace.

use thiserror::Error;

/// The unified error type for the fleet orchestrator.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The workflow has no name.
    #[error("workflow name is required")]
    MissingWorkflowName,

    /// The workflow declares no tasks.
    #[error("workflow must have at least one task")]
    NoTasks,

    /// A task was declared with an empty id.
    #[error("task ID is required")]
    MissingTaskId,

    /// Two tasks share an id.
    #[error("duplicate task ID: {task_id}")]
    DuplicateTaskId { task_id: String },

    /// A task has an empty prompt template.
    #[error("task {task_id}: prompt is required")]
    MissingPrompt { task_id: String },

    /// A task depends on an id no task declares.
    #[error("task {task_id}: dependency {dependency} not found")]
    UnknownDependency { task_id: String, dependency: String },

    /// The dependency relation contains a cycle. `path` starts and ends at
    /// the same task.
    #[error("circular dependency detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// A workflow document could not be read or parsed.
    #[error("workflow parse error: {reason}")]
    WorkflowParse { reason: String },

    /// No agent has been registered for the task.
    #[error("agent for task {task_id} not found")]
    AgentNotFound { task_id: String },

    /// An agent is already registered for the task.
    #[error("agent for task {task_id} already exists")]
    AgentAlreadyExists { task_id: String },

    /// A completion was reported for a task that is already completed.
    #[error("task {task_id} is already completed")]
    AlreadyCompleted { task_id: String },

    /// A lifecycle change the state machine does not allow.
    #[error("invalid transition for task {task_id}: {reason}")]
    InvalidTransition { task_id: String, reason: String },

    /// The question id is out of range for the agent.
    #[error("question {question_id} not found for task {task_id}")]
    QuestionNotFound { task_id: String, question_id: u32 },

    /// The follow-up id is out of range for the agent.
    #[error("follow-up {follow_up_id} not found for task {task_id}")]
    FollowUpNotFound { task_id: String, follow_up_id: u32 },

    /// The session state lock was poisoned by a panicking writer.
    #[error("session state lock poisoned")]
    LockPoisoned,

    /// A snapshot could not be written or read.
    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    /// The file watcher could not be created or extended.
    #[error("monitor error: {reason}")]
    Monitor { reason: String },

    /// A message or response file was malformed.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// No response arrived before the request deadline.
    #[error("timeout waiting for {waiting_for} ({seconds} seconds)")]
    Timeout { waiting_for: String, seconds: u64 },

    /// The orchestrator executed an operation and reported failure.
    #[error("orchestrator error: {reason}")]
    OperationFailed { reason: String },

    /// A filesystem call failed.
    #[error("io error at '{path}': {reason}")]
    Io { path: String, reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

impl FleetError {
    /// Wrap an `std::io::Error` with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        FleetError::Io {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the fleet crates.
pub type FleetResult<T> = Result<T, FleetError>;
