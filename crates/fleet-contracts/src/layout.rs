//! On-disk session layout.
//!
//! ```text
//! <session>/plan.md
//! <session>/workflow.<fmt>
//! <session>/state.json
//! <session>/workers/worker-<task-id>/
//!     context.txt
//!     questions/q-<n>.txt, a-<n>.txt
//!     followup/q-<n>.txt, a-<n>.txt
//!     messages/<msg-id>.json
//!     responses/<msg-id>-result.json
//!     output.txt, status.txt, COMPLETE
//! ```
//!
//! Both the orchestrator and the worker-side client derive every path from
//! these helpers so the two sides cannot drift apart.

use std::io::Write;
use std::path::{Path, PathBuf};

pub const WORKERS_DIR: &str = "workers";
pub const WORKER_DIR_PREFIX: &str = "worker-";
pub const PLAN_FILE: &str = "plan.md";
pub const STATE_FILE: &str = "state.json";
pub const CONTEXT_FILE: &str = "context.txt";
pub const OUTPUT_FILE: &str = "output.txt";
pub const STATUS_FILE: &str = "status.txt";
pub const COMPLETE_MARKER: &str = "COMPLETE";
pub const QUESTIONS_DIR: &str = "questions";
pub const FOLLOWUP_DIR: &str = "followup";
pub const MESSAGES_DIR: &str = "messages";
pub const RESPONSES_DIR: &str = "responses";

/// Subdirectories created inside every worker directory at spawn.
pub const WORKER_SUBDIRS: [&str; 4] = [QUESTIONS_DIR, FOLLOWUP_DIR, MESSAGES_DIR, RESPONSES_DIR];

/// Environment variable naming the session id, handed to each worker.
pub const ENV_SESSION_ID: &str = "FLEET_SESSION_ID";
/// Environment variable naming the worker directory, handed to each worker.
pub const ENV_WORKER_DIR: &str = "FLEET_WORKER_DIR";

/// Paths rooted at one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plan_file(&self) -> PathBuf {
        self.root.join(PLAN_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn workers_dir(&self) -> PathBuf {
        self.root.join(WORKERS_DIR)
    }

    pub fn worker_dir(&self, task_id: &str) -> PathBuf {
        self.workers_dir().join(format!("{WORKER_DIR_PREFIX}{task_id}"))
    }

    /// Find a `workflow.{toml,yaml,yml,json}` file in the session root.
    pub fn find_workflow_file(&self) -> Option<PathBuf> {
        ["toml", "yaml", "yml", "json"]
            .iter()
            .map(|ext| self.root.join(format!("workflow.{ext}")))
            .find(|p| p.is_file())
    }
}

/// Paths inside one worker directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLayout {
    dir: PathBuf,
}

impl WorkerLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn context_file(&self) -> PathBuf {
        self.dir.join(CONTEXT_FILE)
    }

    pub fn output_file(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE)
    }

    pub fn status_file(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn complete_marker(&self) -> PathBuf {
        self.dir.join(COMPLETE_MARKER)
    }

    pub fn question_file(&self, n: u32) -> PathBuf {
        self.dir.join(QUESTIONS_DIR).join(format!("q-{n}.txt"))
    }

    pub fn answer_file(&self, n: u32) -> PathBuf {
        self.dir.join(QUESTIONS_DIR).join(format!("a-{n}.txt"))
    }

    pub fn follow_up_file(&self, n: u32) -> PathBuf {
        self.dir.join(FOLLOWUP_DIR).join(format!("q-{n}.txt"))
    }

    pub fn follow_up_answer_file(&self, n: u32) -> PathBuf {
        self.dir.join(FOLLOWUP_DIR).join(format!("a-{n}.txt"))
    }

    pub fn message_file(&self, message_id: &str) -> PathBuf {
        self.dir.join(MESSAGES_DIR).join(format!("{message_id}.json"))
    }

    pub fn response_file(&self, message_id: &str) -> PathBuf {
        self.dir
            .join(RESPONSES_DIR)
            .join(format!("{message_id}-result.json"))
    }
}

/// Parse the `<n>` out of a `q-<n>.txt` / `a-<n>.txt` file name.
pub fn sequence_number(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(".txt")?;
    let (_, n) = stem.split_once('-')?;
    n.parse().ok()
}

/// Write `contents` to `path` through a hidden sibling temp file and a
/// rename, so readers never see a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
}
