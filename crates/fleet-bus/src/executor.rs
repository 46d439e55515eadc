//! Operation execution.
//!
//! `OperationExecutor` is the seam between decoding a request and acting on
//! it. The file bus uses `LocalExecutor`; another transport can reuse the
//! same trait and get identical semantics.

use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use fleet_contracts::message::{Edit, Operation};

/// A failed operation. `output` carries whatever the operation produced
/// before failing, e.g. a command's captured stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub reason: String,
    pub output: Option<String>,
}

impl OperationFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), output: None }
    }
}

pub type OperationOutcome = Result<String, OperationFailure>;

/// Performs one decoded operation on behalf of a worker.
pub trait OperationExecutor: Send + Sync {
    /// Execute `operation`. Relative paths are resolved against
    /// `working_dir`, the requesting worker's directory.
    fn execute(&self, operation: &Operation, working_dir: &Path) -> OperationOutcome;
}

/// Executes operations directly on the local filesystem and shell.
///
/// Commands run synchronously with no time limit.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl OperationExecutor for LocalExecutor {
    fn execute(&self, operation: &Operation, working_dir: &Path) -> OperationOutcome {
        debug!(kind = operation.kind(), working_dir = %working_dir.display(), "executing operation");
        match operation {
            Operation::ReadFile { path } => read_file(&resolve(working_dir, path)),
            Operation::WriteFile { path, content } => write_file(&resolve(working_dir, path), content),
            Operation::EditFile { path, edits } => edit_file(&resolve(working_dir, path), edits),
            Operation::Bash { command, working_dir: cwd } => {
                let cwd = cwd
                    .as_deref()
                    .map(|d| resolve(working_dir, d))
                    .unwrap_or_else(|| working_dir.to_path_buf());
                bash(command, &cwd)
            }
            Operation::Glob { pattern } => glob_paths(pattern, working_dir),
            Operation::Grep { pattern, path } => {
                let root = path
                    .as_deref()
                    .map(|p| resolve(working_dir, p))
                    .unwrap_or_else(|| working_dir.to_path_buf());
                grep(pattern, &root)
            }
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn read_file(path: &Path) -> OperationOutcome {
    std::fs::read_to_string(path)
        .map_err(|e| OperationFailure::new(format!("failed to read '{}': {}", path.display(), e)))
}

fn write_file(path: &Path, content: &str) -> OperationOutcome {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            OperationFailure::new(format!("failed to create '{}': {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, content)
        .map_err(|e| OperationFailure::new(format!("failed to write '{}': {}", path.display(), e)))?;
    Ok(format!("wrote {} bytes to {}", content.len(), path.display()))
}

/// Apply `edits` in order, each replacing the first occurrence of its
/// `old_string` in the text produced by the edits before it.
///
/// Not atomic: when an `old_string` is missing, the replacements applied so
/// far are written before the error is returned.
fn edit_file(path: &Path, edits: &[Edit]) -> OperationOutcome {
    let original = read_file(path)?;
    let mut content = original.clone();

    for (idx, edit) in edits.iter().enumerate() {
        let missing = if edit.old_string.is_empty() {
            Some("old_string is empty".to_string())
        } else if !content.contains(&edit.old_string) {
            Some(format!("old_string not found: {:?}", edit.old_string))
        } else {
            None
        };

        if let Some(reason) = missing {
            if content != original {
                std::fs::write(path, &content).map_err(|e| {
                    OperationFailure::new(format!("failed to write '{}': {}", path.display(), e))
                })?;
            }
            return Err(OperationFailure::new(format!(
                "edit {} of {} failed: {}",
                idx + 1,
                edits.len(),
                reason
            )));
        }
        content = content.replacen(&edit.old_string, &edit.new_string, 1);
    }

    std::fs::write(path, &content)
        .map_err(|e| OperationFailure::new(format!("failed to write '{}': {}", path.display(), e)))?;
    Ok(format!("applied {} edits to {}", edits.len(), path.display()))
}

/// Run `command` under `bash -c`; stdout then stderr are returned together.
fn bash(command: &str, cwd: &Path) -> OperationOutcome {
    let output = Command::new("bash")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .output()
        .map_err(|e| OperationFailure::new(format!("failed to run bash: {}", e)))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(OperationFailure {
            reason: format!("command exited with status {}", code),
            output: Some(combined),
        })
    }
}

/// Paths matching `pattern`, one per line. Relative patterns are matched
/// under `base` and reported relative to it.
fn glob_paths(pattern: &str, base: &Path) -> OperationOutcome {
    let relative = !Path::new(pattern).is_absolute();
    let full = if relative {
        base.join(pattern).to_string_lossy().into_owned()
    } else {
        pattern.to_string()
    };

    let entries = glob::glob(&full)
        .map_err(|e| OperationFailure::new(format!("invalid glob pattern '{}': {}", pattern, e)))?;

    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| OperationFailure::new(format!("glob failed: {}", e)))?;
        let shown = if relative {
            path.strip_prefix(base).unwrap_or(&path).to_path_buf()
        } else {
            path
        };
        matches.push(shown.display().to_string());
    }
    Ok(matches.join("\n"))
}

/// `path:line:text` for every line under `root` matching `pattern`.
///
/// Hidden entries below `root` and files that are not UTF-8 are skipped.
/// No matches is an empty success.
fn grep(pattern: &str, root: &Path) -> OperationOutcome {
    let re = Regex::new(pattern)
        .map_err(|e| OperationFailure::new(format!("invalid regex '{}': {}", pattern, e)))?;
    if !root.exists() {
        return Err(OperationFailure::new(format!("path not found: '{}'", root.display())));
    }

    let mut hits = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (idx, line) in text.lines().enumerate() {
            if re.is_match(line) {
                hits.push(format!("{}:{}:{}", entry.path().display(), idx + 1, line));
            }
        }
    }
    Ok(hits.join("\n"))
}
