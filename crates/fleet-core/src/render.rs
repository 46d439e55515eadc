//! Text handed to workers: the `context.txt` briefing and the short spawn
//! prompt that points at it.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use fleet_contracts::workflow::Task;
use fleet_graph::interpolate;

/// Inputs for one worker's `context.txt`.
#[derive(Debug, Clone, Copy)]
pub struct ContextInput<'a> {
    pub task: &'a Task,
    pub session_id: &'a str,
    pub plan: &'a str,
    pub session_dir: &'a Path,
    pub worker_dir: &'a Path,
    pub outputs: &'a BTreeMap<String, String>,
}

/// Render the full briefing: task prompt with placeholders resolved, the
/// plan, dependency outputs in `depends_on` order, and the protocol.
pub fn render_context(input: &ContextInput<'_>) -> String {
    let task = input.task;
    let prompt = interpolate(&task.prompt, input.outputs);

    let mut previous = String::new();
    for dep in &task.depends_on {
        if let Some(output) = input.outputs.get(dep) {
            let _ = write!(previous, "### Output from task: {}\n{}\n\n", dep, output);
        }
    }
    if previous.is_empty() {
        previous.push_str("(none)\n");
    }

    let mut out = String::new();
    let _ = writeln!(out, "# Fleet worker - task: {}", task.id);
    out.push('\n');
    let _ = writeln!(out, "## Environment");
    let _ = writeln!(out, "- Session: {}", input.session_id);
    let _ = writeln!(out, "- Worker directory: {}", input.worker_dir.display());
    let _ = writeln!(out, "- Session directory: {}", input.session_dir.display());
    if !task.agent_type.is_empty() {
        let _ = writeln!(out, "- Agent type: {}", task.agent_type);
    }
    out.push('\n');
    let _ = writeln!(out, "## Your task");
    if !task.description.is_empty() {
        let _ = writeln!(out, "{}\n", task.description);
    }
    let _ = writeln!(out, "{}\n", prompt);
    let _ = writeln!(out, "## Plan");
    let _ = writeln!(out, "{}\n", input.plan.trim_end());
    let _ = writeln!(out, "## Context from previous tasks");
    out.push_str(&previous);
    out.push('\n');
    out.push_str(PROTOCOL);
    out
}

/// The short prompt a launcher starts the worker with.
pub fn render_spawn_prompt(task: &Task, worker_dir: &Path, session_id: &str) -> String {
    format!(
        "You are worker '{id}' in fleet session {session}.\n\
         \n\
         Read your briefing first:\n\
         cat {context}\n\
         \n\
         Your working directory is {dir}. Use `fleet worker` for every file \
         operation, shell command, and question, and finish with \
         `fleet worker complete`.\n",
        id = task.id,
        session = session_id,
        context = worker_dir.join(fleet_contracts::layout::CONTEXT_FILE).display(),
        dir = worker_dir.display(),
    )
}

const PROTOCOL: &str = "\
## Protocol

Talk to the orchestrator with the `fleet worker` commands. They read
FLEET_WORKER_DIR, which is already set for you.

Questions (blocks until answered):
    fleet worker ask \"Which database should the service use?\"

Operations, performed by the orchestrator on your behalf:
    fleet worker read <path>
    fleet worker write <path> <content>
    fleet worker edit <path> --old <text> --new <text> [--old <text> --new <text> ...]
    fleet worker bash <command> [--dir <dir>]
    fleet worker glob <pattern>
    fleet worker grep <regex> [--path <path>]

Follow-ups from the orchestrator:
    fleet worker followups
    fleet worker answer-followup <id> <answer>

When finished:
    fleet worker complete --output \"<final result>\"
If you cannot finish:
    fleet worker fail \"<reason>\"

Work autonomously, ask when the plan is unclear, and always finish with
`complete` or `fail`.
";
