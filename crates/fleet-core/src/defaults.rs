//! Stock collaborators.

use std::fmt::Write as _;

use tracing::{info, warn};

use fleet_contracts::{error::FleetResult, spawn::SpawnDirective};

use crate::engine::RunOutcome;
use crate::traits::{AnswerSynthesizer, Launcher, QuestionContext};

/// Reports each spawn directive through `tracing` and leaves starting the
/// worker to whoever reads the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingLauncher;

impl Launcher for LoggingLauncher {
    fn spawn(&self, directive: &SpawnDirective) -> FleetResult<()> {
        let env: Vec<String> = directive.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        info!(
            task_id = %directive.task_id,
            agent_type = %directive.agent_type,
            directory = %directive.directory.display(),
            env = %env.join(" "),
            "spawn worker\n{}",
            directive.instructions
        );
        Ok(())
    }

    fn task_failed(&self, task_id: &str, reason: &str) {
        warn!(task_id = %task_id, reason = %reason, "task failed; dependents are blocked");
    }

    fn finished(&self, outcome: &RunOutcome) {
        info!(outcome = %outcome, "run finished");
    }
}

/// Answers from the plan, the task, and dependency outputs.
///
/// It does not interpret the question. The answer gathers the material the
/// worker needs to decide for itself.
#[derive(Debug, Default, Clone)]
pub struct PlanContextSynthesizer;

impl AnswerSynthesizer for PlanContextSynthesizer {
    fn answer(&self, ctx: &QuestionContext<'_>) -> FleetResult<String> {
        let mut out = String::new();
        let _ = writeln!(out, "Question: {}", ctx.question.trim());
        out.push('\n');
        let _ = writeln!(out, "Task '{}'", ctx.task.id);
        if !ctx.task.description.is_empty() {
            let _ = writeln!(out, "{}", ctx.task.description);
        }
        out.push('\n');
        let _ = writeln!(out, "Follow the plan:");
        let _ = writeln!(out, "{}", ctx.plan.trim_end());

        let deps: Vec<&String> = ctx
            .task
            .depends_on
            .iter()
            .filter(|d| ctx.outputs.contains_key(*d))
            .collect();
        if !deps.is_empty() {
            out.push('\n');
            let _ = writeln!(out, "Results of the tasks you depend on:");
            for dep in deps {
                let _ = writeln!(out, "- {}: {}", dep, ctx.outputs[dep].trim_end());
            }
        }

        let earlier = ctx.agent.questions.iter().filter(|q| q.answer.is_some()).count();
        if earlier > 0 {
            out.push('\n');
            let _ = writeln!(out, "You have {} earlier answered question(s) in questions/.", earlier);
        }
        Ok(out)
    }
}
