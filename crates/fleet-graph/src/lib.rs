//! # fleet-graph
//!
//! Task-graph validation, workflow loading, and prompt interpolation.
//!
//! Validation runs once, before orchestration starts. A workflow that
//! passes has unique task ids, only declared dependencies, and no cycles;
//! everything downstream relies on those three facts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_graph::{load_workflow, interpolate};
//!
//! let workflow = load_workflow(Path::new("session/workflow.toml"))?;
//! let prompt = interpolate(&workflow.tasks[1].prompt, &outputs);
//! ```

pub mod interpolate;
pub mod loader;
pub mod validate;

pub use interpolate::{interpolate, referenced_tasks};
pub use loader::{load_workflow, parse_workflow, WorkflowFormat};
pub use validate::validate;

// ── Tests ─────────────────────────────────────────────────────────────────────
