//! Workflow document loading.
//!
//! The document syntax is incidental; TOML, YAML, and JSON all map onto the
//! same `Workflow` type and are validated before being returned.
//!
//! ```toml
//! name = "release"
//!
//! [[tasks]]
//! id = "build"
//! agent_type = "coder"
//! prompt = "Build the crate"
//!
//! [[tasks]]
//! id = "notes"
//! prompt = "Write notes for {build.output}"
//! depends_on = ["build"]
//! ```

use std::path::Path;

use fleet_contracts::{
    error::{FleetError, FleetResult},
    workflow::Workflow,
};

use crate::validate::validate;

/// Supported workflow document syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowFormat {
    Toml,
    Yaml,
    Json,
}

impl WorkflowFormat {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> FleetResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("toml") => Ok(WorkflowFormat::Toml),
            Some("yaml") | Some("yml") => Ok(WorkflowFormat::Yaml),
            Some("json") => Ok(WorkflowFormat::Json),
            _ => Err(FleetError::WorkflowParse {
                reason: format!(
                    "unsupported workflow file extension: '{}'",
                    path.display()
                ),
            }),
        }
    }
}

/// Parse `text` in the given syntax and validate the result.
pub fn parse_workflow(text: &str, format: WorkflowFormat) -> FleetResult<Workflow> {
    let workflow: Workflow = match format {
        WorkflowFormat::Toml => toml::from_str(text).map_err(|e| FleetError::WorkflowParse {
            reason: format!("failed to parse workflow TOML: {}", e),
        })?,
        WorkflowFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| FleetError::WorkflowParse {
                reason: format!("failed to parse workflow YAML: {}", e),
            })?
        }
        WorkflowFormat::Json => {
            serde_json::from_str(text).map_err(|e| FleetError::WorkflowParse {
                reason: format!("failed to parse workflow JSON: {}", e),
            })?
        }
    };

    validate(&workflow)?;
    Ok(workflow)
}

/// Read, parse, and validate the workflow file at `path`.
pub fn load_workflow(path: &Path) -> FleetResult<Workflow> {
    let format = WorkflowFormat::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|e| FleetError::WorkflowParse {
        reason: format!("failed to read workflow file '{}': {}", path.display(), e),
    })?;
    parse_workflow(&text, format)
}
