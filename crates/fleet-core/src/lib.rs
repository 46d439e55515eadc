//! # fleet-core
//!
//! The orchestration engine and its collaborator seams.
//!
//! ## Architecture
//!
//! ```text
//!   workers write files ──► FileMonitor ──► Engine loop ──► SessionStore
//!                                             │   │
//!                               MessageBus ◄──┘   └──► Launcher / AnswerSynthesizer
//! ```
//!
//! The engine owns no worker processes. It prepares each worker's directory,
//! hands a `SpawnDirective` to a `Launcher`, and from then on reacts only to
//! what appears on disk.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_core::{Engine, LoggingLauncher};
//!
//! let engine = Engine::create(session_dir, plan, workflow, &config, Box::new(LoggingLauncher))?;
//! let stop = engine.stop_handle();
//! let outcome = engine.run()?;
//! ```

pub mod defaults;
pub mod engine;
pub mod render;
pub mod traits;

pub use defaults::{LoggingLauncher, PlanContextSynthesizer};
pub use engine::{Engine, RunOutcome, StopHandle};
pub use traits::{AnswerSynthesizer, Launcher, QuestionContext};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use fleet_bus::BusClient;
    use fleet_contracts::{
        config::{BusSettings, EngineSettings, FleetConfig},
        error::{FleetError, FleetResult},
        event::{EventKind, FileEvent},
        layout::{write_atomic, SessionLayout, WorkerLayout, ENV_SESSION_ID, ENV_WORKER_DIR, WORKER_SUBDIRS},
        message::{Message, Operation},
        spawn::SpawnDirective,
        workflow::{Task, TaskStatus, Workflow},
    };
    use fleet_state::SnapshotStore;

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct RecordingLauncher {
        spawned: Arc<Mutex<Vec<SpawnDirective>>>,
        failed: Arc<Mutex<Vec<(String, String)>>>,
        outcomes: Arc<Mutex<Vec<RunOutcome>>>,
        refuse: bool,
    }

    impl RecordingLauncher {
        fn spawned_ids(&self) -> Vec<String> {
            self.spawned.lock().unwrap().iter().map(|d| d.task_id.clone()).collect()
        }

        fn directive(&self, task_id: &str) -> Option<SpawnDirective> {
            self.spawned.lock().unwrap().iter().find(|d| d.task_id == task_id).cloned()
        }
    }

    impl Launcher for RecordingLauncher {
        fn spawn(&self, directive: &SpawnDirective) -> FleetResult<()> {
            if self.refuse {
                return Err(FleetError::OperationFailed { reason: "no capacity".to_string() });
            }
            self.spawned.lock().unwrap().push(directive.clone());
            Ok(())
        }

        fn task_failed(&self, task_id: &str, reason: &str) {
            self.failed.lock().unwrap().push((task_id.to_string(), reason.to_string()));
        }

        fn finished(&self, outcome: &RunOutcome) {
            self.outcomes.lock().unwrap().push(outcome.clone());
        }
    }

    fn task(id: &str, prompt: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            agent_type: "coder".to_string(),
            description: format!("task {id}"),
            prompt: prompt.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// A, then B which consumes A's output.
    fn chain() -> Workflow {
        Workflow {
            name: "chain".to_string(),
            description: String::new(),
            tasks: vec![
                task("A", "Write the schema", &[]),
                task("B", "Summarize {A.output}", &["A"]),
            ],
        }
    }

    fn single() -> Workflow {
        Workflow {
            name: "single".to_string(),
            description: String::new(),
            tasks: vec![task("A", "Do it", &[])],
        }
    }

    fn config(tick_ms: u64) -> FleetConfig {
        FleetConfig {
            engine: EngineSettings { tick_interval_ms: tick_ms, ..EngineSettings::default() },
            bus: BusSettings::default(),
        }
    }

    fn engine(dir: &Path, workflow: Workflow, launcher: &RecordingLauncher) -> Engine {
        Engine::create(dir, "PLAN: use postgres", workflow, &config(1_000), Box::new(launcher.clone()))
            .unwrap()
    }

    fn worker(dir: &Path, task_id: &str) -> WorkerLayout {
        WorkerLayout::new(SessionLayout::new(dir).worker_dir(task_id))
    }

    fn event(kind: EventKind, task_id: &str, path: PathBuf) -> FileEvent {
        FileEvent::new(kind, task_id, Some(path))
    }

    fn finish_worker(layout: &WorkerLayout, output: &str) {
        std::fs::write(layout.output_file(), output).unwrap();
        std::fs::write(layout.complete_marker(), "").unwrap();
    }

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    // ── Startup and spawning ──────────────────────────────────────────────────

    #[test]
    fn create_rejects_invalid_workflow_before_touching_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let cyclic = Workflow {
            name: "loop".to_string(),
            description: String::new(),
            tasks: vec![task("A", "a", &["B"]), task("B", "b", &["A"])],
        };
        let result = Engine::create(
            tmp.path(),
            "",
            cyclic,
            &config(1_000),
            Box::new(RecordingLauncher::default()),
        );
        assert!(matches!(result, Err(FleetError::CycleDetected { .. })));
        assert!(!tmp.path().join("workers").exists());
    }

    #[test]
    fn spawn_prepares_worker_directory_and_directive() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), chain(), &launcher);

        engine.spawn_ready();
        engine.spawn_ready();
        assert_eq!(launcher.spawned_ids(), vec!["A"]);

        let a = worker(tmp.path(), "A");
        for sub in WORKER_SUBDIRS {
            assert!(a.dir().join(sub).is_dir(), "missing {sub}");
        }
        let context = std::fs::read_to_string(a.context_file()).unwrap();
        assert!(context.contains("Write the schema"));
        assert!(context.contains("PLAN: use postgres"));
        assert!(context.contains("fleet worker complete"));

        let directive = launcher.directive("A").unwrap();
        assert_eq!(directive.directory, a.dir());
        assert_eq!(directive.agent_type, "coder");
        assert!(directive.instructions.contains("context.txt"));
        let store = engine.store();
        assert!(directive
            .env
            .contains(&(ENV_SESSION_ID.to_string(), store.session_id())));
        assert!(directive
            .env
            .contains(&(ENV_WORKER_DIR.to_string(), a.dir().display().to_string())));
        assert_eq!(store.agent("A").unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn launcher_refusal_fails_the_task() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher { refuse: true, ..RecordingLauncher::default() };
        let engine = engine(tmp.path(), single(), &launcher);

        engine.spawn_ready();
        assert_eq!(engine.store().agent("A").unwrap().status, TaskStatus::Failed);
        let failed = launcher.failed.lock().unwrap().clone();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].1.contains("no capacity"));
    }

    // ── Event handling ────────────────────────────────────────────────────────

    #[test]
    fn completion_spawns_dependents_with_interpolated_context() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), chain(), &launcher);
        engine.spawn_ready();

        let a = worker(tmp.path(), "A");
        finish_worker(&a, "schema-v1");
        engine
            .handle_event(&event(EventKind::TaskCompleted, "A", a.complete_marker()))
            .unwrap();

        assert_eq!(launcher.spawned_ids(), vec!["A", "B"]);
        let context = std::fs::read_to_string(worker(tmp.path(), "B").context_file()).unwrap();
        assert!(context.contains("Summarize schema-v1"));
        assert!(context.contains("Output from task: A\nschema-v1"));

        // A second marker event changes nothing.
        engine
            .handle_event(&event(EventKind::TaskCompleted, "A", a.complete_marker()))
            .unwrap();
        assert_eq!(engine.store().completed_tasks(), vec!["A"]);
    }

    #[test]
    fn question_is_answered_once_and_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), single(), &launcher);
        engine.spawn_ready();

        let a = worker(tmp.path(), "A");
        std::fs::write(a.question_file(1), "which db?").unwrap();
        let ev = event(EventKind::QuestionAsked, "A", a.question_file(1));
        engine.handle_event(&ev).unwrap();
        engine.handle_event(&ev).unwrap();

        let answer = std::fs::read_to_string(a.answer_file(1)).unwrap();
        assert!(answer.contains("which db?"));
        assert!(answer.contains("PLAN: use postgres"));

        let agent = engine.store().agent("A").unwrap();
        assert_eq!(agent.questions.len(), 1);
        assert_eq!(agent.questions[0].answer.as_deref(), Some(answer.as_str()));
    }

    #[test]
    fn failed_status_fails_task_and_run_stalls() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), chain(), &launcher);
        engine.spawn_ready();

        let a = worker(tmp.path(), "A");
        std::fs::write(a.status_file(), "failed: no network\n").unwrap();
        engine
            .handle_event(&event(EventKind::StatusUpdate, "A", a.status_file()))
            .unwrap();

        let agent = engine.store().agent("A").unwrap();
        assert_eq!(agent.status, TaskStatus::Failed);
        assert_eq!(agent.error, "no network");
        assert_eq!(
            launcher.failed.lock().unwrap().clone(),
            vec![("A".to_string(), "no network".to_string())]
        );
        assert_eq!(engine.tick(), Some(RunOutcome::Stalled { failed: vec!["A".to_string()] }));
        assert_eq!(launcher.spawned_ids(), vec!["A"]);
    }

    #[test]
    fn operation_request_is_served_through_the_bus() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), single(), &launcher);
        engine.spawn_ready();

        let a = worker(tmp.path(), "A");
        let message = Message::new(Operation::WriteFile {
            path: PathBuf::from("notes.txt"),
            content: "hello".to_string(),
        });
        let request = a.message_file(&message.id);
        write_atomic(&request, &serde_json::to_vec(&message).unwrap()).unwrap();

        engine
            .handle_event(&event(EventKind::OperationRequest, "A", request))
            .unwrap();
        assert!(a.response_file(&message.id).is_file());
        assert_eq!(std::fs::read_to_string(a.dir().join("notes.txt")).unwrap(), "hello");
    }

    #[test]
    fn request_with_foreign_id_runs_at_most_once() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), single(), &launcher);
        engine.spawn_ready();

        let a = worker(tmp.path(), "A");
        std::fs::write(a.dir().join("x.txt"), "foo foo foo").unwrap();
        let request = a.message_file("foo");
        write_atomic(
            &request,
            br#"{"id":"bar","type":"edit_file","path":"x.txt","edits":[{"old_string":"foo","new_string":"baz"}],"timestamp":"2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        engine
            .handle_event(&event(EventKind::OperationRequest, "A", request))
            .unwrap();
        engine.reconcile();
        engine.reconcile();

        assert_eq!(std::fs::read_to_string(a.dir().join("x.txt")).unwrap(), "foo foo foo");
        assert!(a.response_file("foo").is_file());
        assert!(!a.response_file("bar").exists());
    }

    #[test]
    fn reconciled_questions_keep_file_numbers() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), single(), &launcher);
        engine.spawn_ready();

        let a = worker(tmp.path(), "A");
        for n in 1..=11 {
            std::fs::write(a.question_file(n), format!("question {n}")).unwrap();
        }
        engine.reconcile();

        let agent = engine.store().agent("A").unwrap();
        let recorded: Vec<(u32, String)> =
            agent.questions.iter().map(|q| (q.id, q.text.clone())).collect();
        let expected: Vec<(u32, String)> = (1..=11).map(|n| (n, format!("question {n}"))).collect();
        assert_eq!(recorded, expected);
        for n in 1..=11 {
            let answer = std::fs::read_to_string(a.answer_file(n)).unwrap();
            assert!(answer.contains(&format!("question {n}")), "a-{n}: {answer}");
        }
        assert_eq!(agent.unanswered_questions(), 0);
    }

    #[test]
    fn follow_up_is_written_and_answer_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), single(), &launcher);
        engine.spawn_ready();

        let id = engine.ask_follow_up("A", "progress?").unwrap();
        assert_eq!(id, 1);
        let a = worker(tmp.path(), "A");
        assert_eq!(std::fs::read_to_string(a.follow_up_file(1)).unwrap(), "progress?");

        std::fs::write(a.follow_up_answer_file(1), "halfway").unwrap();
        engine
            .handle_event(&event(EventKind::FollowUpAnswered, "A", a.follow_up_answer_file(1)))
            .unwrap();
        let agent = engine.store().agent("A").unwrap();
        assert_eq!(agent.follow_ups[0].answer.as_deref(), Some("halfway"));

        assert!(matches!(
            engine.ask_follow_up("missing", "?"),
            Err(FleetError::AgentNotFound { .. })
        ));
    }

    // ── Tick, persistence, resume ─────────────────────────────────────────────

    #[test]
    fn tick_reconciles_completion_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = engine(tmp.path(), single(), &launcher);
        engine.spawn_ready();
        assert_eq!(engine.tick(), None);

        finish_worker(&worker(tmp.path(), "A"), "done");
        assert_eq!(engine.tick(), Some(RunOutcome::Completed));

        let saved = SnapshotStore::new(SessionLayout::new(tmp.path()).state_file())
            .load_state()
            .unwrap();
        assert_eq!(saved.completed_tasks, vec!["A"]);
        assert!(saved.completed_at.is_some());
    }

    #[test]
    fn resume_continues_without_respawning() {
        let tmp = tempfile::tempdir().unwrap();
        let first = RecordingLauncher::default();
        let session_id = {
            let engine = engine(tmp.path(), chain(), &first);
            engine.spawn_ready();
            assert_eq!(engine.tick(), None);
            engine.store().session_id()
        };

        // A finishes while no orchestrator is running.
        finish_worker(&worker(tmp.path(), "A"), "offline result");

        let second = RecordingLauncher::default();
        let engine = Engine::resume(tmp.path(), &config(1_000), Box::new(second.clone())).unwrap();
        assert_eq!(engine.store().session_id(), session_id);

        engine.reconcile();
        assert_eq!(engine.store().completed_tasks(), vec!["A"]);
        assert_eq!(second.spawned_ids(), vec!["B"]);
    }

    #[test]
    fn resume_without_snapshot_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Engine::resume(tmp.path(), &config(1_000), Box::new(RecordingLauncher::default()));
        assert!(matches!(result, Err(FleetError::Persistence { .. })));
    }

    // ── Full runs ─────────────────────────────────────────────────────────────

    #[test]
    fn run_drives_workers_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = Engine::create(
            tmp.path(),
            "PLAN",
            chain(),
            &config(20),
            Box::new(launcher.clone()),
        )
        .unwrap();
        let runner = thread::spawn(move || engine.run());

        let bus = BusSettings {
            poll_interval_ms: 10,
            question_poll_interval_ms: 10,
            ..BusSettings::default()
        };

        wait_until("A to spawn", || launcher.directive("A").is_some());
        let a = BusClient::new(launcher.directive("A").unwrap().directory, bus.clone());
        a.write_file("artifact.txt", "alpha").unwrap();
        assert_eq!(a.read_file("artifact.txt").unwrap(), "alpha");
        a.complete("A done").unwrap();

        wait_until("B to spawn", || launcher.directive("B").is_some());
        let b = BusClient::new(launcher.directive("B").unwrap().directory, bus);
        let answer = b.ask("what next?").unwrap();
        assert!(answer.contains("A done"));
        b.complete("B done").unwrap();

        let outcome = runner.join().unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(launcher.outcomes.lock().unwrap().clone(), vec![RunOutcome::Completed]);
    }

    #[test]
    fn stop_handle_ends_run() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let engine = Engine::create(tmp.path(), "", single(), &config(20), Box::new(launcher.clone()))
            .unwrap();
        let stop = engine.stop_handle();
        let runner = thread::spawn(move || engine.run());

        wait_until("A to spawn", || launcher.directive("A").is_some());
        stop.stop();
        stop.stop();

        assert_eq!(runner.join().unwrap().unwrap(), RunOutcome::Stopped);
        assert!(SessionLayout::new(tmp.path()).state_file().is_file());
    }
}
