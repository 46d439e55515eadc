//! Collaborator seams for the orchestration engine.
//!
//! - `Launcher`         : starts worker processes; the engine never does
//! - `AnswerSynthesizer`: turns a worker question into an answer
//!
//! Both are called from the engine's single loop thread.

use std::collections::BTreeMap;

use fleet_contracts::{agent::AgentState, error::FleetResult, spawn::SpawnDirective, workflow::Task};

use crate::engine::RunOutcome;

/// Starts workers and receives lifecycle reports.
pub trait Launcher: Send + Sync {
    /// Start a worker for `directive`.
    ///
    /// An `Err` fails the task: the engine has already registered the agent
    /// and will not retry the launch.
    fn spawn(&self, directive: &SpawnDirective) -> FleetResult<()>;

    /// A task failed. Its dependents will never become ready.
    fn task_failed(&self, _task_id: &str, _reason: &str) {}

    /// The run ended with `outcome`.
    fn finished(&self, _outcome: &RunOutcome) {}
}

/// Everything known when a worker asks a question.
#[derive(Debug, Clone, Copy)]
pub struct QuestionContext<'a> {
    pub task: &'a Task,
    pub agent: &'a AgentState,
    pub question: &'a str,
    pub plan: &'a str,
    pub outputs: &'a BTreeMap<String, String>,
}

/// Produces the answer written back to a worker's `a-<n>.txt`.
pub trait AnswerSynthesizer: Send + Sync {
    fn answer(&self, ctx: &QuestionContext<'_>) -> FleetResult<String>;
}
