//! Structural validation of a workflow's task graph.
//!
//! Checks run in a fixed order and stop at the first violation:
//!
//! 1. workflow name present, at least one task
//! 2. per task, in declaration order: id present and unique, prompt present,
//!    every dependency declared somewhere in the workflow
//! 3. the dependency relation is acyclic

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use fleet_contracts::{
    error::{FleetError, FleetResult},
    workflow::Workflow,
};

use crate::interpolate::referenced_tasks;

/// Validate `workflow`, returning the first violation found.
pub fn validate(workflow: &Workflow) -> FleetResult<()> {
    if workflow.name.trim().is_empty() {
        return Err(FleetError::MissingWorkflowName);
    }
    if workflow.tasks.is_empty() {
        return Err(FleetError::NoTasks);
    }

    let declared: HashSet<&str> = workflow.tasks.iter().map(|t| t.id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(workflow.tasks.len());

    for task in &workflow.tasks {
        if task.id.is_empty() {
            return Err(FleetError::MissingTaskId);
        }
        if !seen.insert(task.id.as_str()) {
            return Err(FleetError::DuplicateTaskId { task_id: task.id.clone() });
        }
        if task.prompt.trim().is_empty() {
            return Err(FleetError::MissingPrompt { task_id: task.id.clone() });
        }
        for dep in &task.depends_on {
            if !declared.contains(dep.as_str()) {
                return Err(FleetError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        // Not fatal: such a placeholder may still be unresolved at spawn time.
        for referenced in referenced_tasks(&task.prompt) {
            if !task.depends_on.contains(&referenced) {
                warn!(
                    task_id = %task.id,
                    referenced = %referenced,
                    "prompt references the output of a task it does not depend on"
                );
            }
        }
    }

    check_acyclic(workflow)?;

    debug!(
        workflow = %workflow.name,
        tasks = workflow.tasks.len(),
        "workflow validated"
    );
    Ok(())
}

/// Traversal marks for the cycle search.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current DFS path.
    OnPath,
    /// Fully explored; no cycle reachable from here.
    Done,
}

/// Depth-first search from every task in declaration order.
///
/// The on-path mark is cleared when a node is left (post-order), so a shared
/// dependency reached by two independent branches is not a cycle.
fn check_acyclic(workflow: &Workflow) -> FleetResult<()> {
    let deps: HashMap<&str, &[String]> = workflow
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.as_slice()))
        .collect();

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(deps.len());
    let mut path: Vec<&str> = Vec::new();

    for task in &workflow.tasks {
        visit(task.id.as_str(), &deps, &mut marks, &mut path)?;
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> FleetResult<()> {
    match marks.get(node) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::OnPath) => {
            // Report only the loop itself, from the first visit of `node`.
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Err(FleetError::CycleDetected { path: cycle });
        }
        None => {}
    }

    marks.insert(node, Mark::OnPath);
    path.push(node);

    for dep in deps.get(node).copied().unwrap_or_default() {
        visit(dep.as_str(), deps, marks, path)?;
    }

    path.pop();
    marks.insert(node, Mark::Done);
    Ok(())
}
