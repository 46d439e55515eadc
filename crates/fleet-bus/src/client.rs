//! The worker side of the file protocol.
//!
//! A worker process builds a `BusClient` from `FLEET_WORKER_DIR` and talks
//! to the orchestrator only through files in that directory. Every write
//! goes through a hidden temp file and a rename so the orchestrator never
//! reads a partial request.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use fleet_contracts::{
    config::BusSettings,
    error::{FleetError, FleetResult},
    layout::{
        sequence_number, write_atomic, WorkerLayout, ENV_WORKER_DIR, FOLLOWUP_DIR, QUESTIONS_DIR,
        WORKER_DIR_PREFIX,
    },
    message::{Edit, Message, Operation, Response},
};

/// A follow-up question from the orchestrator that has no answer yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFollowUp {
    pub id: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct BusClient {
    layout: WorkerLayout,
    settings: BusSettings,
}

impl BusClient {
    pub fn new(worker_dir: impl Into<PathBuf>, settings: BusSettings) -> Self {
        Self { layout: WorkerLayout::new(worker_dir), settings }
    }

    /// Build a client for the worker directory named by `FLEET_WORKER_DIR`.
    pub fn from_env(settings: BusSettings) -> FleetResult<Self> {
        let dir = std::env::var_os(ENV_WORKER_DIR).ok_or_else(|| FleetError::ConfigError {
            reason: format!("{} is not set", ENV_WORKER_DIR),
        })?;
        Ok(Self::new(dir, settings))
    }

    pub fn worker_dir(&self) -> &Path {
        self.layout.dir()
    }

    /// The task id encoded in the worker directory name.
    pub fn task_id(&self) -> String {
        let name = self
            .layout
            .dir()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.strip_prefix(WORKER_DIR_PREFIX) {
            Some(id) => id.to_string(),
            None => name,
        }
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Send `operation` and wait for its response payload.
    ///
    /// An error response becomes `OperationFailed`, with any payload (e.g. a
    /// failed command's output) appended to the reason.
    pub fn request(&self, operation: Operation) -> FleetResult<String> {
        let timeout = self.settings.timeout_for(operation.class());
        let message = Message::new(operation);
        let data = serde_json::to_vec_pretty(&message).map_err(|e| FleetError::Protocol {
            reason: format!("failed to encode message: {}", e),
        })?;
        let request_path = self.layout.message_file(&message.id);
        write_file(&request_path, &data)?;
        debug!(message_id = %message.id, kind = message.operation.kind(), "request sent");

        let response_path = self.layout.response_file(&message.id);
        wait_for(&response_path, self.settings.poll_interval(), timeout).ok_or_else(|| {
            FleetError::Timeout {
                waiting_for: format!("response to {}", message.id),
                seconds: timeout.as_secs(),
            }
        })?;

        let text = read_file(&response_path)?;
        let response: Response = serde_json::from_str(&text).map_err(|e| FleetError::Protocol {
            reason: format!("invalid response '{}': {}", response_path.display(), e),
        })?;

        if response.is_success() {
            return Ok(response.data.unwrap_or_default());
        }
        let mut reason = response.error.unwrap_or_else(|| "unknown error".to_string());
        if let Some(output) = response.data.filter(|d| !d.is_empty()) {
            reason.push('\n');
            reason.push_str(&output);
        }
        Err(FleetError::OperationFailed { reason })
    }

    pub fn read_file(&self, path: impl Into<PathBuf>) -> FleetResult<String> {
        self.request(Operation::ReadFile { path: path.into() })
    }

    pub fn write_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) -> FleetResult<String> {
        self.request(Operation::WriteFile { path: path.into(), content: content.into() })
    }

    pub fn edit_file(&self, path: impl Into<PathBuf>, edits: Vec<Edit>) -> FleetResult<String> {
        self.request(Operation::EditFile { path: path.into(), edits })
    }

    pub fn bash(&self, command: impl Into<String>, working_dir: Option<PathBuf>) -> FleetResult<String> {
        self.request(Operation::Bash { command: command.into(), working_dir })
    }

    pub fn glob(&self, pattern: impl Into<String>) -> FleetResult<String> {
        self.request(Operation::Glob { pattern: pattern.into() })
    }

    pub fn grep(&self, pattern: impl Into<String>, path: Option<PathBuf>) -> FleetResult<String> {
        self.request(Operation::Grep { pattern: pattern.into(), path })
    }

    // ── Questions and follow-ups ─────────────────────────────────────────────

    /// Ask the orchestrator a question and block until it answers.
    pub fn ask(&self, question: &str) -> FleetResult<String> {
        let n = next_sequence(&self.layout.dir().join(QUESTIONS_DIR), "q-")?;
        write_file(&self.layout.question_file(n), question.as_bytes())?;
        debug!(question = n, "question asked");

        let answer_path = self.layout.answer_file(n);
        let timeout = self.settings.question_timeout();
        wait_for(&answer_path, self.settings.question_poll_interval(), timeout).ok_or_else(|| {
            FleetError::Timeout {
                waiting_for: format!("answer to question {}", n),
                seconds: timeout.as_secs(),
            }
        })?;
        read_file(&answer_path)
    }

    /// Follow-up questions without an answer file, oldest first.
    pub fn pending_follow_ups(&self) -> FleetResult<Vec<PendingFollowUp>> {
        let mut pending = Vec::new();
        for id in sequence_numbers(&self.layout.dir().join(FOLLOWUP_DIR), "q-")? {
            if self.layout.follow_up_answer_file(id).exists() {
                continue;
            }
            let text = read_file(&self.layout.follow_up_file(id))?;
            pending.push(PendingFollowUp { id, text });
        }
        Ok(pending)
    }

    pub fn answer_follow_up(&self, id: u32, answer: &str) -> FleetResult<()> {
        if !self.layout.follow_up_file(id).exists() {
            return Err(FleetError::FollowUpNotFound {
                task_id: self.task_id(),
                follow_up_id: id,
            });
        }
        write_file(&self.layout.follow_up_answer_file(id), answer.as_bytes())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Publish the final output and signal completion. The marker is written
    /// last, after the output it announces.
    pub fn complete(&self, output: &str) -> FleetResult<()> {
        write_file(&self.layout.output_file(), output.as_bytes())?;
        write_file(&self.layout.status_file(), b"completed")?;
        write_file(&self.layout.complete_marker(), b"")
    }

    pub fn fail(&self, reason: &str) -> FleetResult<()> {
        write_file(&self.layout.status_file(), format!("failed: {}", reason).as_bytes())
    }
}

/// Poll until `path` exists or `timeout` elapses.
fn wait_for(path: &Path, interval: Duration, timeout: Duration) -> Option<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if path.is_file() {
            return Some(());
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(interval.min(deadline - now));
    }
}

fn sequence_numbers(dir: &Path, prefix: &str) -> FleetResult<Vec<u32>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(FleetError::io(dir, e)),
    };
    let mut ids: Vec<u32> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                sequence_number(&name)
            } else {
                None
            }
        })
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

fn next_sequence(dir: &Path, prefix: &str) -> FleetResult<u32> {
    Ok(sequence_numbers(dir, prefix)?.last().map_or(1, |n| n + 1))
}

fn write_file(path: &Path, data: &[u8]) -> FleetResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| FleetError::io(dir, e))?;
    }
    write_atomic(path, data).map_err(|e| FleetError::io(path, e))
}

fn read_file(path: &Path) -> FleetResult<String> {
    std::fs::read_to_string(path).map_err(|e| FleetError::io(path, e))
}
