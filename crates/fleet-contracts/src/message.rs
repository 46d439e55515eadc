//! The file-encoded request/response protocol.
//!
//! A worker writes a `Message` as JSON into its `messages/` directory; the
//! orchestrator answers with a `Response` in `responses/`. Each operation
//! kind has its own variant so a malformed request fails at decode time
//! instead of deep inside the executor.
//!
//! Wire shape (the `type` tag sits next to the envelope fields):
//!
//! ```json
//! { "id": "msg-1f3c", "type": "edit_file", "path": "src/lib.rs",
//!   "edits": [{ "old_string": "a", "new_string": "b" }],
//!   "timestamp": "2025-01-01T00:00:00Z" }
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One first-occurrence replacement within an `edit_file` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub old_string: String,
    pub new_string: String,
}

/// A privileged operation a worker asks the orchestrator to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    ReadFile {
        path: PathBuf,
    },
    WriteFile {
        path: PathBuf,
        content: String,
    },
    EditFile {
        path: PathBuf,
        edits: Vec<Edit>,
    },
    Bash {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    Glob {
        #[serde(alias = "path")]
        pattern: String,
    },
    Grep {
        #[serde(alias = "content")]
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
}

/// Which timeout class a request falls into on the worker side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    File,
    Command,
}

impl Operation {
    /// The wire name of this operation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::ReadFile { .. } => "read_file",
            Operation::WriteFile { .. } => "write_file",
            Operation::EditFile { .. } => "edit_file",
            Operation::Bash { .. } => "bash",
            Operation::Glob { .. } => "glob",
            Operation::Grep { .. } => "grep",
        }
    }

    pub fn class(&self) -> OperationClass {
        match self {
            Operation::Bash { .. } => OperationClass::Command,
            _ => OperationClass::File,
        }
    }
}

/// A request envelope written by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(flatten)]
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Wrap `operation` in an envelope with a fresh `msg-<uuid>` id.
    pub fn new(operation: Operation) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4().simple()),
            operation,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// The orchestrator's answer to one `Message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub message_id: String,
    pub status: ResponseStatus,
    /// Operation payload. Present on success, and on command failure where
    /// it carries the captured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    pub fn success(message_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: ResponseStatus::Success,
            data: Some(data.into()),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Attach a payload to an error response.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
