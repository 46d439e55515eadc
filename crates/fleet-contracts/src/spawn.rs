//! The boundary contract with the worker-spawning collaborator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Everything a launcher needs to start one worker process.
///
/// The orchestrator never starts the process itself; it hands one of these
/// to a `Launcher` and waits for filesystem artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnDirective {
    pub task_id: String,
    pub agent_type: String,
    /// Short bootstrap prompt pointing the worker at its `context.txt`.
    pub instructions: String,
    /// The worker's directory; also its expected working directory.
    pub directory: PathBuf,
    /// Environment values the worker must be started with.
    pub env: Vec<(String, String)>,
}
