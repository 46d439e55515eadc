//! The orchestration engine.
//!
//! One thread runs the loop:
//!
//!   wait for event (until next tick) → handle → drain monitor errors
//!   → on tick: reconcile, spawn ready tasks, save snapshot, check end
//!
//! Handlers never propagate into the loop. A failed handler is logged and
//! the next tick's reconciliation retries whatever is still unhandled on
//! disk, so a missed or failed notification delays work but never loses it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use fleet_bus::{MessageBus, OperationExecutor};
use fleet_contracts::{
    config::{EngineSettings, FleetConfig},
    error::{FleetError, FleetResult},
    event::{EventKind, FileEvent},
    layout::{
        sequence_number, write_atomic, SessionLayout, WorkerLayout, ENV_SESSION_ID,
        ENV_WORKER_DIR, MESSAGES_DIR, QUESTIONS_DIR, WORKER_SUBDIRS,
    },
    spawn::SpawnDirective,
    workflow::{Task, TaskStatus, Workflow},
};
use fleet_graph::validate;
use fleet_monitor::{FileMonitor, MonitorChannels};
use fleet_state::{SessionStore, SnapshotStore};

use crate::defaults::PlanContextSynthesizer;
use crate::render::{render_context, render_spawn_prompt, ContextInput};
use crate::traits::{AnswerSynthesizer, Launcher, QuestionContext};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task completed.
    Completed,
    /// Nothing is running, nothing is ready, and the workflow is not
    /// complete. `failed` lists the tasks that caused it.
    Stalled { failed: Vec<String> },
    /// `StopHandle::stop` was called.
    Stopped,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Stalled { failed } if failed.is_empty() => f.write_str("stalled"),
            RunOutcome::Stalled { failed } => write!(f, "stalled (failed: {})", failed.join(", ")),
            RunOutcome::Stopped => f.write_str("stopped"),
        }
    }
}

/// Stops a running engine from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    monitor: FileMonitor,
}

impl StopHandle {
    /// Close the monitor and end the loop. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.monitor.stop();
    }
}

pub struct Engine {
    layout: SessionLayout,
    store: Arc<SessionStore>,
    snapshots: SnapshotStore,
    monitor: FileMonitor,
    channels: MonitorChannels,
    bus: MessageBus,
    launcher: Box<dyn Launcher>,
    synthesizer: Box<dyn AnswerSynthesizer>,
    settings: EngineSettings,
    stopped: Arc<AtomicBool>,
}

impl Engine {
    /// Start a new session for `workflow` in `session_dir`.
    ///
    /// The workflow is validated first; nothing touches the disk if it is
    /// rejected.
    pub fn create(
        session_dir: &Path,
        plan: impl Into<String>,
        workflow: Workflow,
        config: &FleetConfig,
        launcher: Box<dyn Launcher>,
    ) -> FleetResult<Self> {
        validate(&workflow)?;
        let session_id = format!("session-{}", uuid::Uuid::new_v4().simple());
        let store = SessionStore::new(session_id, plan, workflow);
        Self::with_store(session_dir, store, config, launcher)
    }

    /// Continue the session snapshotted in `session_dir/state.json`.
    pub fn resume(session_dir: &Path, config: &FleetConfig, launcher: Box<dyn Launcher>) -> FleetResult<Self> {
        let layout = SessionLayout::new(session_dir);
        let store = SnapshotStore::new(layout.state_file()).load()?;
        validate(&store.workflow())?;
        info!(
            session_id = %store.session_id(),
            completed = store.completed_tasks().len(),
            "resuming session"
        );
        Self::with_store(session_dir, store, config, launcher)
    }

    /// Wrap an existing store and start watching the workers directory.
    pub fn with_store(
        session_dir: &Path,
        store: SessionStore,
        config: &FleetConfig,
        launcher: Box<dyn Launcher>,
    ) -> FleetResult<Self> {
        let layout = SessionLayout::new(session_dir);
        let (monitor, channels) = FileMonitor::start(&layout.workers_dir(), &config.engine)?;
        Ok(Self {
            snapshots: SnapshotStore::new(layout.state_file()),
            layout,
            store: Arc::new(store),
            monitor,
            channels,
            bus: MessageBus::default(),
            launcher,
            synthesizer: Box::new(PlanContextSynthesizer),
            settings: config.engine.clone(),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_synthesizer(mut self, synthesizer: Box<dyn AnswerSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_executor(mut self, executor: Box<dyn OperationExecutor>) -> Self {
        self.bus = MessageBus::new(executor);
        self
    }

    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { stopped: Arc::clone(&self.stopped), monitor: self.monitor.clone() }
    }

    // ── Loop ─────────────────────────────────────────────────────────────────

    /// Run until the workflow completes, stalls, or is stopped.
    pub fn run(&self) -> FleetResult<RunOutcome> {
        info!(
            session_id = %self.store.session_id(),
            tasks = self.store.workflow().tasks.len(),
            tick_ms = self.settings.tick_interval_ms,
            "engine started"
        );
        self.reconcile();
        self.spawn_ready();
        self.save_snapshot();

        let tick = self.settings.tick_interval();
        let mut next_tick = Instant::now() + tick;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(self.finish(RunOutcome::Stopped));
            }

            let wait = next_tick.saturating_duration_since(Instant::now());
            match self.channels.events.recv_timeout(wait) {
                Ok(event) => {
                    if let Err(e) = self.handle_event(&event) {
                        warn!(task_id = %event.task_id, kind = %event.kind, error = %e, "event handling failed");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        return Ok(self.finish(RunOutcome::Stopped));
                    }
                    return Err(FleetError::Monitor { reason: "event stream closed".to_string() });
                }
            }
            self.drain_errors();

            if Instant::now() >= next_tick {
                if let Some(outcome) = self.tick() {
                    return Ok(self.finish(outcome));
                }
                next_tick = Instant::now() + tick;
            }
        }
    }

    /// One periodic pass. Returns the outcome if the run is over.
    pub fn tick(&self) -> Option<RunOutcome> {
        self.reconcile();
        self.spawn_ready();
        self.save_snapshot();

        if self.store.is_complete() {
            if let Err(e) = self.store.mark_complete() {
                error!(error = %e, "failed to mark session complete");
            }
            self.save_snapshot();
            return Some(RunOutcome::Completed);
        }
        if self.store.active_agents().is_empty() && self.store.get_ready_tasks().is_empty() {
            return Some(RunOutcome::Stalled { failed: self.store.failed_tasks() });
        }
        trace!(progress = self.store.get_progress(), "tick");
        None
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        self.monitor.stop();
        self.save_snapshot();
        match &outcome {
            RunOutcome::Completed => info!(session_id = %self.store.session_id(), "workflow completed"),
            RunOutcome::Stalled { failed } => {
                warn!(failed = %failed.join(", "), "workflow stalled")
            }
            RunOutcome::Stopped => info!("engine stopped"),
        }
        self.launcher.finished(&outcome);
        outcome
    }

    fn drain_errors(&self) {
        loop {
            match self.channels.errors.try_recv() {
                Ok(e) => warn!(error = %e, "monitor error"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn save_snapshot(&self) {
        if let Err(e) = self.snapshots.save(&self.store) {
            error!(error = %e, "failed to save snapshot; retrying next tick");
        }
    }

    // ── Spawning ─────────────────────────────────────────────────────────────

    /// Spawn every ready task. Failures are logged; a task whose directory
    /// could not be prepared stays ready and is retried next tick.
    pub fn spawn_ready(&self) {
        for task in self.store.get_ready_tasks() {
            if let Err(e) = self.spawn(&task) {
                warn!(task_id = %task.id, error = %e, "spawn failed");
            }
        }
    }

    fn spawn(&self, task: &Task) -> FleetResult<()> {
        let dir = self.layout.worker_dir(&task.id);
        for sub in WORKER_SUBDIRS {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path).map_err(|e| FleetError::io(&path, e))?;
        }
        self.monitor.watch_worker_dir(&dir)?;

        let session_id = self.store.session_id();
        let plan = self.store.plan();
        let outputs = self.store.get_outputs();
        let context = render_context(&ContextInput {
            task,
            session_id: &session_id,
            plan: &plan,
            session_dir: self.layout.root(),
            worker_dir: &dir,
            outputs: &outputs,
        });
        let worker = WorkerLayout::new(&dir);
        let context_file = worker.context_file();
        std::fs::write(&context_file, context).map_err(|e| FleetError::io(&context_file, e))?;

        self.store.add_agent(&task.id, dir.clone())?;

        let directive = SpawnDirective {
            task_id: task.id.clone(),
            agent_type: task.agent_type.clone(),
            instructions: render_spawn_prompt(task, &dir, &session_id),
            directory: dir.clone(),
            env: vec![
                (ENV_SESSION_ID.to_string(), session_id),
                (ENV_WORKER_DIR.to_string(), dir.display().to_string()),
            ],
        };
        info!(task_id = %task.id, agent_type = %task.agent_type, dir = %dir.display(), "spawning worker");
        if let Err(e) = self.launcher.spawn(&directive) {
            let reason = format!("launch failed: {}", e);
            self.fail(&task.id, &reason);
            return Err(e);
        }
        Ok(())
    }

    // ── Follow-ups ───────────────────────────────────────────────────────────

    /// Ask a running worker a question. Returns the follow-up id; the answer
    /// arrives later as a follow-up-answered event.
    pub fn ask_follow_up(&self, task_id: &str, text: &str) -> FleetResult<u32> {
        let agent = self
            .store
            .agent(task_id)
            .ok_or_else(|| FleetError::AgentNotFound { task_id: task_id.to_string() })?;
        let id = self.store.add_follow_up(task_id, text)?;
        let path = WorkerLayout::new(&agent.working_dir).follow_up_file(id);
        write_atomic(&path, text.as_bytes()).map_err(|e| FleetError::io(&path, e))?;
        info!(task_id = %task_id, follow_up = id, "follow-up asked");
        Ok(id)
    }

    // ── Event handling ───────────────────────────────────────────────────────

    /// Dispatch one classified event.
    pub fn handle_event(&self, event: &FileEvent) -> FleetResult<()> {
        debug!(task_id = %event.task_id, kind = %event.kind, "event");
        let path = || {
            event.path.clone().ok_or_else(|| FleetError::Protocol {
                reason: format!("{} event for '{}' has no path", event.kind, event.task_id),
            })
        };
        match event.kind {
            EventKind::QuestionAsked => self.handle_question(&event.task_id, &path()?),
            EventKind::TaskCompleted => self.handle_completion(&event.task_id),
            EventKind::OperationRequest => self.handle_operation(&path()?),
            EventKind::FollowUpAnswered => self.handle_follow_up_answer(&event.task_id, &path()?),
            EventKind::StatusUpdate => self.handle_status(&event.task_id),
            // Artifacts this side wrote itself, or store-only kinds.
            EventKind::QuestionAnswered
            | EventKind::FollowUpAsked
            | EventKind::TaskStarted
            | EventKind::TaskFailed => Ok(()),
        }
    }

    fn handle_question(&self, task_id: &str, question_path: &Path) -> FleetResult<()> {
        let n = file_sequence(question_path)?;
        let worker = WorkerLayout::new(worker_dir_of(question_path, 2)?);
        let answer_path = worker.answer_file(n);
        if answer_path.exists() {
            trace!(task_id = %task_id, question = n, "already answered");
            return Ok(());
        }

        let text = read_text(question_path)?;
        self.store.record_question(task_id, n, &text)?;
        let task = self
            .store
            .task(task_id)
            .ok_or_else(|| FleetError::AgentNotFound { task_id: task_id.to_string() })?;
        let agent = self
            .store
            .agent(task_id)
            .ok_or_else(|| FleetError::AgentNotFound { task_id: task_id.to_string() })?;
        let plan = self.store.plan();
        let outputs = self.store.get_outputs();

        let answer = self.synthesizer.answer(&QuestionContext {
            task: &task,
            agent: &agent,
            question: &text,
            plan: &plan,
            outputs: &outputs,
        })?;
        write_atomic(&answer_path, answer.as_bytes()).map_err(|e| FleetError::io(&answer_path, e))?;
        self.store.answer_question(task_id, n, &answer)?;

        info!(task_id = %task_id, question = n, "question answered");
        Ok(())
    }

    fn handle_completion(&self, task_id: &str) -> FleetResult<()> {
        let agent = self
            .store
            .agent(task_id)
            .ok_or_else(|| FleetError::AgentNotFound { task_id: task_id.to_string() })?;
        if agent.status != TaskStatus::Running {
            trace!(task_id = %task_id, status = %agent.status, "completion ignored");
            return Ok(());
        }
        let output_path = WorkerLayout::new(&agent.working_dir).output_file();
        let output = read_text(&output_path)?;
        self.store.complete_task(task_id, &output)?;
        self.spawn_ready();
        Ok(())
    }

    fn handle_operation(&self, message_path: &Path) -> FleetResult<()> {
        if response_exists(message_path) {
            return Ok(());
        }
        let response = self.bus.handle_message_file(message_path)?;
        debug!(message_id = %response.message_id, success = response.is_success(), "operation handled");
        Ok(())
    }

    fn handle_follow_up_answer(&self, task_id: &str, answer_path: &Path) -> FleetResult<()> {
        let n = file_sequence(answer_path)?;
        let answer = read_text(answer_path)?;
        self.store.answer_follow_up(task_id, n, &answer)?;
        info!(task_id = %task_id, follow_up = n, "follow-up answered");
        Ok(())
    }

    /// `status.txt` holds free text; `failed` or `failed: <reason>` fails
    /// the task.
    fn handle_status(&self, task_id: &str) -> FleetResult<()> {
        let agent = self
            .store
            .agent(task_id)
            .ok_or_else(|| FleetError::AgentNotFound { task_id: task_id.to_string() })?;
        let status_path = WorkerLayout::new(&agent.working_dir).status_file();
        let status = read_text(&status_path)?;
        let status = status.trim();

        match failure_reason(status) {
            Some(reason) if agent.status == TaskStatus::Running => self.fail(task_id, &reason),
            Some(_) => trace!(task_id = %task_id, "failure status for finished task ignored"),
            None => info!(task_id = %task_id, status = %status, "status update"),
        }
        Ok(())
    }

    fn fail(&self, task_id: &str, reason: &str) {
        match self.store.fail_task(task_id, reason) {
            Ok(()) => self.launcher.task_failed(task_id, reason),
            Err(e) => warn!(task_id = %task_id, error = %e, "could not fail task"),
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────────────

    /// Handle artifacts of running workers that no event has covered:
    /// unanswered questions, unserved requests, failure status, and the
    /// completion marker, in that order.
    pub fn reconcile(&self) {
        for agent in self.store.active_agents() {
            let worker = WorkerLayout::new(&agent.working_dir);
            let task_id = agent.task_id.as_str();

            let mut questions = list_files(&worker.dir().join(QUESTIONS_DIR), |name| name.starts_with("q-"));
            questions.sort_by_key(|path| path.file_name().and_then(|n| n.to_str()).and_then(sequence_number));
            for path in questions {
                if let Err(e) = self.handle_question(task_id, &path) {
                    warn!(task_id = %task_id, path = %path.display(), error = %e, "question retry failed");
                }
            }
            for path in list_files(&worker.dir().join(MESSAGES_DIR), |name| name.ends_with(".json")) {
                if let Err(e) = self.handle_operation(&path) {
                    warn!(task_id = %task_id, path = %path.display(), error = %e, "request retry failed");
                }
            }
            let reports_failure = std::fs::read_to_string(worker.status_file())
                .map(|s| failure_reason(s.trim()).is_some())
                .unwrap_or(false);
            if reports_failure {
                if let Err(e) = self.handle_status(task_id) {
                    warn!(task_id = %task_id, error = %e, "status retry failed");
                }
                continue;
            }
            if worker.complete_marker().is_file() {
                if let Err(e) = self.handle_completion(task_id) {
                    warn!(task_id = %task_id, error = %e, "completion retry failed");
                }
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn read_text(path: &Path) -> FleetResult<String> {
    std::fs::read_to_string(path).map_err(|e| FleetError::io(path, e))
}

fn file_sequence(path: &Path) -> FleetResult<u32> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(sequence_number)
        .ok_or_else(|| FleetError::Protocol {
            reason: format!("no sequence number in '{}'", path.display()),
        })
}

/// The directory `levels` above `path`.
fn worker_dir_of(path: &Path, levels: usize) -> FleetResult<&Path> {
    let mut dir = path;
    for _ in 0..levels {
        dir = dir.parent().ok_or_else(|| FleetError::Protocol {
            reason: format!("'{}' is not inside a worker directory", path.display()),
        })?;
    }
    Ok(dir)
}

fn response_exists(message_path: &Path) -> bool {
    let Some(id) = message_path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    match worker_dir_of(message_path, 2) {
        Ok(dir) => WorkerLayout::new(dir).response_file(id).exists(),
        Err(_) => false,
    }
}

/// `Some(reason)` if `status` reports failure.
fn failure_reason(status: &str) -> Option<String> {
    let rest = status.strip_prefix("failed")?;
    if !(rest.is_empty() || rest.starts_with(':') || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    let reason = rest.trim_start_matches(':').trim();
    Some(if reason.is_empty() {
        "worker reported failure".to_string()
    } else {
        reason.to_string()
    })
}

/// Visible regular files in `dir` whose names pass `keep`, sorted by name.
fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.') && keep(&name)
        })
        .map(|e| e.path())
        .collect();
    files.sort();
    files
}
