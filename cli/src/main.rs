//! fleet: file-protocol orchestrator CLI
//!
//! The orchestrator side (`init`, `validate`, `run`, `status`) and the
//! worker side (`worker ...`) ship in one binary. Workers find their
//! directory through `FLEET_WORKER_DIR`, which every spawn directive sets.
//!
//! Usage:
//!   fleet init ./session
//!   fleet validate ./session/workflow.toml
//!   fleet run --session ./session
//!   fleet status --session ./session
//!   fleet worker ask "Which database?"

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleet_bus::BusClient;
use fleet_contracts::{
    config::FleetConfig,
    error::{FleetError, FleetResult},
    layout::{SessionLayout, WORKERS_DIR},
    message::Edit,
    workflow::TaskStatus,
};
use fleet_core::{Engine, LoggingLauncher, RunOutcome};
use fleet_graph::load_workflow;
use fleet_state::SnapshotStore;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Coordinate a fleet of workers through a shared session directory.
#[derive(Parser)]
#[command(name = "fleet", version, about = "File-protocol task orchestrator")]
struct Cli {
    /// TOML configuration file (engine tick, queue sizes, bus timeouts).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a session directory with a starter plan and workflow.
    Init {
        dir: PathBuf,
        /// Overwrite existing plan and workflow files.
        #[arg(long)]
        force: bool,
    },
    /// Parse and validate a workflow file.
    Validate { workflow: PathBuf },
    /// Run the orchestrator for a session.
    Run(RunArgs),
    /// Print progress from a session's saved state.
    Status {
        #[arg(long)]
        session: PathBuf,
    },
    /// Worker-side protocol commands.
    #[command(subcommand)]
    Worker(WorkerCommand),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    session: PathBuf,
    /// Continue from `state.json` instead of starting fresh.
    #[arg(long)]
    resume: bool,
    /// Stop the run after this many seconds.
    #[arg(long)]
    stop_after_secs: Option<u64>,
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Ask the orchestrator a question and print the answer.
    Ask { question: String },
    /// Publish the final output and mark the task complete.
    Complete {
        #[arg(long, conflicts_with = "output_file")]
        output: Option<String>,
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
    /// Mark the task failed.
    Fail { reason: String },
    /// Read a file.
    Read { path: PathBuf },
    /// Write a file, creating parent directories.
    Write { path: PathBuf, content: String },
    /// Replace first occurrences, in order. Repeat --old/--new for more edits.
    Edit {
        path: PathBuf,
        #[arg(long = "old", required = true)]
        old: Vec<String>,
        #[arg(long = "new", required = true)]
        new: Vec<String>,
    },
    /// Run a shell command.
    Bash {
        command: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List paths matching a glob pattern.
    Glob { pattern: String },
    /// Search file contents with a regex.
    Grep {
        pattern: String,
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// List unanswered follow-up questions.
    Followups,
    /// Answer a follow-up question.
    AnswerFollowup { id: u32, answer: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Command::Init { dir, force } => init(&dir, force),
        Command::Validate { workflow } => validate(&workflow),
        Command::Run(args) => run(&args, &config),
        Command::Status { session } => status(&session),
        Command::Worker(cmd) => worker(cmd, &config),
    });

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("fleet: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> FleetResult<FleetConfig> {
    match path {
        Some(path) => FleetConfig::from_file(path),
        None => Ok(FleetConfig::default()),
    }
}

// ── Orchestrator commands ─────────────────────────────────────────────────────

const STARTER_PLAN: &str = "# Plan\n\nDescribe the overall goal, constraints, and decisions here.\n";

const STARTER_WORKFLOW: &str = r#"name = "example"
description = "Design then implement"

[[tasks]]
id = "design"
agent_type = "architect"
prompt = "Design the module layout described in the plan."

[[tasks]]
id = "implement"
agent_type = "coder"
prompt = "Implement this design: {design.output}"
depends_on = ["design"]
"#;

fn init(dir: &Path, force: bool) -> FleetResult<i32> {
    let layout = SessionLayout::new(dir);
    let workers = dir.join(WORKERS_DIR);
    std::fs::create_dir_all(&workers).map_err(|e| FleetError::io(&workers, e))?;

    let workflow_file = dir.join("workflow.toml");
    for (path, contents) in [(layout.plan_file(), STARTER_PLAN), (workflow_file, STARTER_WORKFLOW)] {
        if path.exists() && !force {
            println!("kept     {}", path.display());
            continue;
        }
        std::fs::write(&path, contents).map_err(|e| FleetError::io(&path, e))?;
        println!("created  {}", path.display());
    }
    println!("Session directory ready: {}", dir.display());
    Ok(0)
}

fn validate(path: &Path) -> FleetResult<i32> {
    let workflow = load_workflow(path)?;
    println!("{}: ok ({} tasks)", workflow.name, workflow.tasks.len());
    for task in &workflow.tasks {
        if task.depends_on.is_empty() {
            println!("  {}", task.id);
        } else {
            println!("  {} <- {}", task.id, task.depends_on.join(", "));
        }
    }
    Ok(0)
}

fn run(args: &RunArgs, config: &FleetConfig) -> FleetResult<i32> {
    let engine = if args.resume {
        Engine::resume(&args.session, config, Box::new(LoggingLauncher))?
    } else {
        let layout = SessionLayout::new(&args.session);
        let workflow_file = layout.find_workflow_file().ok_or_else(|| FleetError::WorkflowParse {
            reason: format!("no workflow.{{toml,yaml,yml,json}} in '{}'", args.session.display()),
        })?;
        let workflow = load_workflow(&workflow_file)?;
        let plan = match std::fs::read_to_string(layout.plan_file()) {
            Ok(plan) => plan,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(FleetError::io(layout.plan_file(), e)),
        };
        Engine::create(&args.session, plan, workflow, config, Box::new(LoggingLauncher))?
    };

    if let Some(secs) = args.stop_after_secs {
        let stop = engine.stop_handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            info!(after_secs = secs, "stop requested");
            stop.stop();
        });
    }

    let outcome = engine.run()?;
    let store = engine.store();
    println!(
        "{}: {} ({}/{} tasks, {:.0}%)",
        store.session_id(),
        outcome,
        store.completed_tasks().len(),
        store.workflow().tasks.len(),
        store.get_progress()
    );
    Ok(match outcome {
        RunOutcome::Completed | RunOutcome::Stopped => 0,
        RunOutcome::Stalled { .. } => 2,
    })
}

fn status(session: &Path) -> FleetResult<i32> {
    let store = SnapshotStore::new(SessionLayout::new(session).state_file()).load()?;
    let state = store.snapshot();

    println!("Session:  {}", state.session_id);
    println!("Workflow: {}", state.workflow.name);
    println!(
        "Progress: {:.0}% ({}/{})",
        store.get_progress(),
        state.completed_tasks.len(),
        state.workflow.tasks.len()
    );
    if let Some(at) = state.completed_at {
        println!("Finished: {}", at.to_rfc3339());
    }
    println!();
    for task in &state.workflow.tasks {
        let line = match state.agents.get(&task.id) {
            None => "pending".to_string(),
            Some(agent) => match agent.status {
                TaskStatus::Failed => format!("failed: {}", agent.error),
                TaskStatus::Running if agent.unanswered_questions() > 0 => {
                    format!("running ({} unanswered)", agent.unanswered_questions())
                }
                status => status.to_string(),
            },
        };
        println!("  {:<20} {}", task.id, line);
    }
    Ok(0)
}

// ── Worker commands ───────────────────────────────────────────────────────────

fn worker(cmd: WorkerCommand, config: &FleetConfig) -> FleetResult<i32> {
    let client = BusClient::from_env(config.bus.clone())?;
    match cmd {
        WorkerCommand::Ask { question } => println!("{}", client.ask(&question)?),
        WorkerCommand::Complete { output, output_file } => {
            let output = match (output, output_file) {
                (Some(text), _) => text,
                (None, Some(path)) => {
                    std::fs::read_to_string(&path).map_err(|e| FleetError::io(&path, e))?
                }
                (None, None) => String::new(),
            };
            client.complete(&output)?;
            println!("task {} complete", client.task_id());
        }
        WorkerCommand::Fail { reason } => {
            client.fail(&reason)?;
            println!("task {} marked failed", client.task_id());
        }
        WorkerCommand::Read { path } => print!("{}", client.read_file(path)?),
        WorkerCommand::Write { path, content } => println!("{}", client.write_file(path, content)?),
        WorkerCommand::Edit { path, old, new } => {
            if old.len() != new.len() {
                return Err(FleetError::OperationFailed {
                    reason: format!("{} --old values but {} --new values", old.len(), new.len()),
                });
            }
            let edits = old
                .into_iter()
                .zip(new)
                .map(|(old_string, new_string)| Edit { old_string, new_string })
                .collect();
            println!("{}", client.edit_file(path, edits)?);
        }
        WorkerCommand::Bash { command, dir } => print!("{}", client.bash(command, dir)?),
        WorkerCommand::Glob { pattern } => println!("{}", client.glob(pattern)?),
        WorkerCommand::Grep { pattern, path } => println!("{}", client.grep(pattern, path)?),
        WorkerCommand::Followups => {
            let pending = client.pending_follow_ups()?;
            if pending.is_empty() {
                println!("no pending follow-ups");
            }
            for follow_up in pending {
                println!("[{}] {}", follow_up.id, follow_up.text.trim_end());
            }
        }
        WorkerCommand::AnswerFollowup { id, answer } => {
            client.answer_follow_up(id, &answer)?;
            println!("follow-up {} answered", id);
        }
    }
    Ok(0)
}
