//! # fleet-state
//!
//! The authoritative, concurrently-accessed session state and its
//! crash-safe snapshot persistence.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_state::{SessionStore, SnapshotStore};
//!
//! let store = SessionStore::new("session-1", plan, workflow);
//! store.add_agent("build", worker_dir)?;
//! store.complete_task("build", "ok")?;
//!
//! SnapshotStore::new(layout.state_file()).save(&store)?;
//! ```

pub mod persistence;
pub mod store;

pub use persistence::SnapshotStore;
pub use store::{SessionState, SessionStore};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;

    use fleet_contracts::{
        error::FleetError,
        event::EventKind,
        workflow::{Task, TaskStatus, Workflow},
    };

    use super::{SessionStore, SnapshotStore};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            agent_type: "general".to_string(),
            description: String::new(),
            prompt: format!("do {id}"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// A → B, A → C, (B, C) → D.
    fn diamond() -> SessionStore {
        let workflow = Workflow {
            name: "diamond".to_string(),
            description: String::new(),
            tasks: vec![
                task("A", &[]),
                task("B", &["A"]),
                task("C", &["A"]),
                task("D", &["B", "C"]),
            ],
        };
        SessionStore::new("session-test", "the plan", workflow)
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    fn spawn(store: &SessionStore, id: &str) {
        store.add_agent(id, PathBuf::from(format!("/w/worker-{id}"))).unwrap();
    }

    // ── Readiness ─────────────────────────────────────────────────────────────

    #[test]
    fn ready_tasks_follow_completions_in_declaration_order() {
        let store = diamond();
        assert_eq!(ids(&store.get_ready_tasks()), vec!["A"]);

        spawn(&store, "A");
        assert!(store.get_ready_tasks().is_empty(), "spawned task must not be ready again");

        store.complete_task("A", "a-out").unwrap();
        assert_eq!(ids(&store.get_ready_tasks()), vec!["B", "C"]);

        spawn(&store, "B");
        spawn(&store, "C");
        store.complete_task("C", "c-out").unwrap();
        assert!(store.get_ready_tasks().is_empty(), "D still waits on B");

        store.complete_task("B", "b-out").unwrap();
        assert_eq!(ids(&store.get_ready_tasks()), vec!["D"]);
    }

    #[test]
    fn failed_task_blocks_dependents_permanently() {
        let store = diamond();
        spawn(&store, "A");
        store.fail_task("A", "boom").unwrap();

        assert!(store.get_ready_tasks().is_empty());
        assert!(!store.is_complete());
        assert_eq!(store.failed_tasks(), vec!["A"]);

        let agent = store.agent("A").unwrap();
        assert_eq!(agent.status, TaskStatus::Failed);
        assert_eq!(agent.error, "boom");
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn add_agent_twice_is_rejected() {
        let store = diamond();
        spawn(&store, "A");
        let err = store.add_agent("A", PathBuf::from("/elsewhere")).unwrap_err();
        assert!(matches!(err, FleetError::AgentAlreadyExists { .. }));
    }

    #[test]
    fn operations_on_unknown_agent_fail_with_not_found() {
        let store = diamond();
        assert!(matches!(
            store.complete_task("A", "x"),
            Err(FleetError::AgentNotFound { .. })
        ));
        assert!(matches!(store.fail_task("A", "x"), Err(FleetError::AgentNotFound { .. })));
        assert!(matches!(store.add_question("A", "?"), Err(FleetError::AgentNotFound { .. })));
    }

    #[test]
    fn duplicate_completion_is_rejected_without_double_append() {
        let store = diamond();
        spawn(&store, "A");
        store.complete_task("A", "first").unwrap();

        let err = store.complete_task("A", "second").unwrap_err();
        assert!(matches!(err, FleetError::AlreadyCompleted { .. }));
        assert_eq!(store.completed_tasks(), vec!["A"]);
        assert_eq!(store.get_outputs().get("A").map(String::as_str), Some("first"));
    }

    #[test]
    fn completed_task_cannot_fail() {
        let store = diamond();
        spawn(&store, "A");
        store.complete_task("A", "done").unwrap();
        assert!(matches!(
            store.fail_task("A", "late"),
            Err(FleetError::InvalidTransition { .. })
        ));
        assert_eq!(store.agent("A").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn progress_is_monotonic_and_reaches_completion() {
        let store = diamond();
        let mut last = store.get_progress();
        assert_eq!(last, 0.0);

        for id in ["A", "B", "C", "D"] {
            spawn(&store, id);
            store.complete_task(id, "out").unwrap();
            let now = store.get_progress();
            assert!(now > last, "progress must increase: {last} -> {now}");
            last = now;
        }
        assert_eq!(last, 100.0);
        assert!(store.is_complete());
    }

    #[test]
    fn progress_of_empty_workflow_is_full() {
        let store = SessionStore::new(
            "s",
            "",
            Workflow { name: "empty".to_string(), description: String::new(), tasks: vec![] },
        );
        assert_eq!(store.get_progress(), 100.0);
    }

    #[test]
    fn store_records_lifecycle_events() {
        let store = diamond();
        spawn(&store, "A");
        store.add_question("A", "why?").unwrap();
        store.complete_task("A", "out").unwrap();

        let kinds: Vec<EventKind> = store.recent_events(10).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::TaskStarted, EventKind::QuestionAsked, EventKind::TaskCompleted]
        );
        assert_eq!(store.recent_events(1)[0].kind, EventKind::TaskCompleted);
    }

    // ── Q&A ───────────────────────────────────────────────────────────────────

    #[test]
    fn questions_are_numbered_and_answerable() {
        let store = diamond();
        spawn(&store, "A");
        assert_eq!(store.add_question("A", "first?").unwrap(), 1);
        assert_eq!(store.add_question("A", "second?").unwrap(), 2);

        store.answer_question("A", 2, "yes").unwrap();
        let agent = store.agent("A").unwrap();
        assert_eq!(agent.questions[1].answer.as_deref(), Some("yes"));
        assert!(agent.questions[1].answered_at.is_some());
        assert_eq!(agent.unanswered_questions(), 1);
    }

    #[test]
    fn answering_out_of_range_question_fails() {
        let store = diamond();
        spawn(&store, "A");
        store.add_question("A", "only one").unwrap();
        for bad in [0, 2] {
            assert!(matches!(
                store.answer_question("A", bad, "x"),
                Err(FleetError::QuestionNotFound { question_id, .. }) if question_id == bad
            ));
        }
    }

    #[test]
    fn recorded_questions_stay_ordered_by_file_number() {
        let store = diamond();
        spawn(&store, "A");
        for n in [1, 10, 2] {
            assert!(store.record_question("A", n, &format!("q{n}")).unwrap());
        }
        assert!(!store.record_question("A", 10, "again").unwrap());

        store.answer_question("A", 10, "ten").unwrap();
        let agent = store.agent("A").unwrap();
        let ids: Vec<u32> = agent.questions.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![1, 2, 10]);
        assert_eq!(agent.questions[2].text, "q10");
        assert_eq!(agent.questions[2].answer.as_deref(), Some("ten"));
        assert_eq!(store.add_question("A", "next").unwrap(), 11);
    }

    #[test]
    fn follow_ups_mirror_questions() {
        let store = diamond();
        spawn(&store, "A");
        let id = store.add_follow_up("A", "status?").unwrap();
        assert_eq!(id, 1);
        store.answer_follow_up("A", id, "halfway").unwrap();
        assert!(matches!(
            store.answer_follow_up("A", 5, "x"),
            Err(FleetError::FollowUpNotFound { .. })
        ));
        let agent = store.agent("A").unwrap();
        assert_eq!(agent.follow_ups[0].answer.as_deref(), Some("halfway"));
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn concurrent_readers_never_see_torn_writes() {
        let store = Arc::new(diamond());
        spawn(&store, "A");

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    store.add_question("A", &format!("q{i}")).unwrap();
                }
                store.complete_task("A", "done").unwrap();
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = store.snapshot();
                        let agent = &snap.agents["A"];
                        // Ids are contiguous: a question is never half-appended.
                        for (idx, q) in agent.questions.iter().enumerate() {
                            assert_eq!(q.id as usize, idx + 1);
                        }
                        // Completion is all-or-nothing across the three places it lands.
                        let listed = snap.completed_tasks.contains(&"A".to_string());
                        let cached = snap.outputs_cache.contains_key("A");
                        assert_eq!(listed, cached);
                        assert_eq!(listed, agent.status == TaskStatus::Completed);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.agent("A").unwrap().questions.len(), 200);
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    #[test]
    fn snapshot_round_trip_preserves_counts_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path().join("state.json"));

        let store = diamond();
        for id in ["A", "B", "C"] {
            spawn(&store, id);
        }
        store.complete_task("A", "alpha").unwrap();
        store.complete_task("B", "beta").unwrap();
        store.add_question("C", "q1").unwrap();
        store.add_question("C", "q2").unwrap();
        store.answer_question("C", 1, "a1").unwrap();

        snapshots.save(&store).unwrap();
        assert!(snapshots.exists());
        let loaded = snapshots.load().unwrap();

        let before = store.snapshot();
        let after = loaded.snapshot();
        assert_eq!(after.agents.len(), 3);
        assert_eq!(after.completed_tasks, vec!["A", "B"]);
        assert_eq!(after.agents["C"].questions.len(), 2);
        assert_eq!(after.outputs_cache, before.outputs_cache);
        assert_eq!(after, before);
        assert_eq!(ids(&loaded.get_ready_tasks()), ids(&store.get_ready_tasks()));
    }

    #[test]
    fn save_replaces_previous_snapshot_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let snapshots = SnapshotStore::new(&path);

        let store = diamond();
        snapshots.save(&store).unwrap();
        spawn(&store, "A");
        snapshots.save(&store).unwrap();

        assert_eq!(snapshots.load().unwrap().snapshot().agents.len(), 1);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "only state.json should remain");
    }

    #[test]
    fn save_overwrites_temp_file_left_by_interrupted_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(dir.path().join("state.json.tmp"), "{ truncated garbage that is longer than it should be").unwrap();

        let store = diamond();
        spawn(&store, "A");
        let snapshots = SnapshotStore::new(&path);
        snapshots.save(&store).unwrap();

        assert_eq!(snapshots.load().unwrap().snapshot(), store.snapshot());
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn load_without_outputs_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path().join("state.json"));
        let store = diamond();
        spawn(&store, "A");
        store.complete_task("A", "alpha").unwrap();

        let mut value = serde_json::to_value(store.snapshot()).unwrap();
        value.as_object_mut().unwrap().remove("outputs_cache");
        std::fs::write(snapshots.path(), serde_json::to_vec(&value).unwrap()).unwrap();

        let loaded = snapshots.load().unwrap();
        assert!(loaded.get_outputs().is_empty());
        assert_eq!(loaded.completed_tasks(), vec!["A"]);
    }

    #[test]
    fn load_missing_snapshot_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path().join("state.json"));
        assert!(!snapshots.exists());
        assert!(matches!(snapshots.load(), Err(FleetError::Persistence { .. })));
    }
}
