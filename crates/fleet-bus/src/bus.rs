//! The orchestrator side of the file bus.

use std::path::Path;

use tracing::{info, warn};

use fleet_contracts::{
    error::{FleetError, FleetResult},
    layout::{write_atomic, WorkerLayout},
    message::{Message, Response},
};

use crate::executor::{LocalExecutor, OperationExecutor};

/// Decodes request files, executes them, and writes responses.
pub struct MessageBus {
    executor: Box<dyn OperationExecutor>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(Box::new(LocalExecutor))
    }
}

impl MessageBus {
    pub fn new(executor: Box<dyn OperationExecutor>) -> Self {
        Self { executor }
    }

    /// Handle `<worker>/messages/<id>.json` and write
    /// `<worker>/responses/<id>-result.json`.
    ///
    /// The response is always keyed by the file stem. A request that cannot
    /// be decoded, or whose `id` differs from the stem, gets an error response
    /// and is not executed. Only failing to write the response is an `Err`.
    pub fn handle_message_file(&self, path: &Path) -> FleetResult<Response> {
        let worker_dir = path
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| FleetError::Protocol {
                reason: format!("message file '{}' is not inside a worker directory", path.display()),
            })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        if stem.is_empty() {
            return Err(FleetError::Protocol {
                reason: format!("message file '{}' has no name", path.display()),
            });
        }

        let response = match decode(path) {
            Ok(message) if message.id == stem => self.execute(&message, worker_dir),
            Ok(message) => {
                warn!(path = %path.display(), message_id = %message.id, "message id does not match file name");
                Response::error(
                    &stem,
                    format!("message id '{}' does not match file name '{}.json'", message.id, stem),
                )
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "undecodable message");
                Response::error(&stem, reason)
            }
        };

        let layout = WorkerLayout::new(worker_dir);
        let target = layout.response_file(&stem);
        write_response(&target, &response)?;
        Ok(response)
    }

    /// Execute an already-decoded message.
    pub fn execute(&self, message: &Message, worker_dir: &Path) -> Response {
        let kind = message.operation.kind();
        match self.executor.execute(&message.operation, worker_dir) {
            Ok(data) => {
                info!(message_id = %message.id, kind, "operation succeeded");
                Response::success(&message.id, data)
            }
            Err(failure) => {
                warn!(message_id = %message.id, kind, reason = %failure.reason, "operation failed");
                let response = Response::error(&message.id, failure.reason);
                match failure.output {
                    Some(output) => response.with_data(output),
                    None => response,
                }
            }
        }
    }
}

fn decode(path: &Path) -> Result<Message, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read message '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid message: {}", e))
}

fn write_response(target: &Path, response: &Response) -> FleetResult<()> {
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| FleetError::io(dir, e))?;
    }
    let data = serde_json::to_vec_pretty(response).map_err(|e| FleetError::Protocol {
        reason: format!("failed to encode response: {}", e),
    })?;
    write_atomic(target, &data).map_err(|e| FleetError::io(target, e))
}
