//! The authoritative session state.
//!
//! `SessionStore` owns a `SessionState` behind a single `RwLock`: many
//! concurrent readers, or one writer. Every mutation takes the write lock
//! for its whole read-modify-write, so readers never observe a half-applied
//! change. No method performs I/O while holding the lock.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleet_contracts::{
    agent::{AgentState, FollowUp, Question},
    error::{FleetError, FleetResult},
    event::{EventKind, FileEvent},
    workflow::{Task, TaskStatus, Workflow},
};

// ── Plain state ───────────────────────────────────────────────────────────────

/// Everything persisted about one orchestration session.
///
/// This is the value snapshots serialize. It is only mutated through
/// `SessionStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub plan: String,
    pub workflow: Workflow,
    /// One entry per spawned task, keyed by task id.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentState>,
    /// Task ids in completion order. Append-only.
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    /// Append-only event log.
    #[serde(default)]
    pub events: Vec<FileEvent>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived task-id → output map used for prompt interpolation.
    /// Snapshots that lack it load with an empty cache.
    #[serde(default)]
    pub outputs_cache: BTreeMap<String, String>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, plan: impl Into<String>, workflow: Workflow) -> Self {
        Self {
            session_id: session_id.into(),
            plan: plan.into(),
            workflow,
            agents: BTreeMap::new(),
            completed_tasks: Vec::new(),
            events: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            outputs_cache: BTreeMap::new(),
        }
    }

    fn agent_mut(&mut self, task_id: &str) -> FleetResult<&mut AgentState> {
        self.agents
            .get_mut(task_id)
            .ok_or_else(|| FleetError::AgentNotFound { task_id: task_id.to_string() })
    }

    fn record(&mut self, kind: EventKind, task_id: &str) {
        self.events.push(FileEvent::new(kind, task_id, None));
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Concurrency-safe owner of one `SessionState`.
///
/// Share it across threads with `Arc<SessionStore>`; all methods take
/// `&self`.
#[derive(Debug)]
pub struct SessionStore {
    inner: RwLock<SessionState>,
}

impl SessionStore {
    /// Start a fresh session for an already-validated workflow.
    pub fn new(session_id: impl Into<String>, plan: impl Into<String>, workflow: Workflow) -> Self {
        Self::from_state(SessionState::new(session_id, plan, workflow))
    }

    /// Wrap existing state, e.g. a loaded snapshot.
    pub fn from_state(state: SessionState) -> Self {
        Self { inner: RwLock::new(state) }
    }

    // Reads recover from poisoning; writes report it.
    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> FleetResult<RwLockWriteGuard<'_, SessionState>> {
        self.inner.write().map_err(|_| FleetError::LockPoisoned)
    }

    // ── Lifecycle mutations ───────────────────────────────────────────────────

    /// Register a newly spawned worker as `Running`.
    pub fn add_agent(&self, task_id: &str, working_dir: PathBuf) -> FleetResult<()> {
        let mut state = self.write()?;
        if state.agents.contains_key(task_id) {
            return Err(FleetError::AgentAlreadyExists { task_id: task_id.to_string() });
        }
        state
            .agents
            .insert(task_id.to_string(), AgentState::running(task_id, working_dir));
        state.record(EventKind::TaskStarted, task_id);
        debug!(task_id = %task_id, "agent registered");
        Ok(())
    }

    /// Mark a task completed with its final output.
    ///
    /// A second completion of the same task is rejected with
    /// `AlreadyCompleted` and changes nothing.
    pub fn complete_task(&self, task_id: &str, output: &str) -> FleetResult<()> {
        let mut state = self.write()?;
        let agent = state.agent_mut(task_id)?;
        if agent.status == TaskStatus::Completed {
            return Err(FleetError::AlreadyCompleted { task_id: task_id.to_string() });
        }
        agent.status = TaskStatus::Completed;
        agent.output = output.to_string();

        state.completed_tasks.push(task_id.to_string());
        state
            .outputs_cache
            .insert(task_id.to_string(), output.to_string());
        state.record(EventKind::TaskCompleted, task_id);

        info!(
            task_id = %task_id,
            completed = state.completed_tasks.len(),
            total = state.workflow.tasks.len(),
            "task completed"
        );
        Ok(())
    }

    /// Mark a task failed. Its dependents stay blocked for the rest of the
    /// session.
    pub fn fail_task(&self, task_id: &str, error: &str) -> FleetResult<()> {
        let mut state = self.write()?;
        let agent = state.agent_mut(task_id)?;
        if agent.status == TaskStatus::Completed {
            return Err(FleetError::InvalidTransition {
                task_id: task_id.to_string(),
                reason: "a completed task cannot fail".to_string(),
            });
        }
        agent.status = TaskStatus::Failed;
        agent.error = error.to_string();
        state.record(EventKind::TaskFailed, task_id);

        warn!(task_id = %task_id, error = %error, "task failed");
        Ok(())
    }

    /// Mark the whole session finished.
    pub fn mark_complete(&self) -> FleetResult<()> {
        let mut state = self.write()?;
        if state.completed_at.is_none() {
            state.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    // ── Q&A ───────────────────────────────────────────────────────────────────

    /// Append a worker question and return its 1-based id.
    pub fn add_question(&self, task_id: &str, text: &str) -> FleetResult<u32> {
        let mut state = self.write()?;
        let agent = state.agent_mut(task_id)?;
        let id = agent.questions.last().map_or(1, |q| q.id.saturating_add(1));
        agent.questions.push(new_question(id, text));
        state.record(EventKind::QuestionAsked, task_id);
        Ok(id)
    }

    /// Record the question a worker filed as `q-<id>.txt`.
    ///
    /// The list stays ordered by id whatever order files are picked up in.
    /// Returns `false` when `id` is already recorded.
    pub fn record_question(&self, task_id: &str, id: u32, text: &str) -> FleetResult<bool> {
        let mut state = self.write()?;
        let agent = state.agent_mut(task_id)?;
        let at = match agent.questions.binary_search_by_key(&id, |q| q.id) {
            Ok(_) => return Ok(false),
            Err(at) => at,
        };
        agent.questions.insert(at, new_question(id, text));
        state.record(EventKind::QuestionAsked, task_id);
        Ok(true)
    }

    pub fn answer_question(&self, task_id: &str, question_id: u32, answer: &str) -> FleetResult<()> {
        let mut state = self.write()?;
        let agent = state.agent_mut(task_id)?;
        let question = agent
            .questions
            .iter_mut()
            .find(|q| q.id == question_id)
            .ok_or_else(|| FleetError::QuestionNotFound { task_id: task_id.to_string(), question_id })?;
        question.answer = Some(answer.to_string());
        question.answered_at = Some(Utc::now());
        state.record(EventKind::QuestionAnswered, task_id);
        Ok(())
    }

    /// Append an orchestrator follow-up and return its 1-based id.
    pub fn add_follow_up(&self, task_id: &str, text: &str) -> FleetResult<u32> {
        let mut state = self.write()?;
        let agent = state.agent_mut(task_id)?;
        let id = next_id(agent.follow_ups.len());
        agent.follow_ups.push(FollowUp {
            id,
            text: text.to_string(),
            asked_at: Utc::now(),
            answer: None,
            answered_at: None,
        });
        state.record(EventKind::FollowUpAsked, task_id);
        Ok(id)
    }

    pub fn answer_follow_up(&self, task_id: &str, follow_up_id: u32, answer: &str) -> FleetResult<()> {
        let mut state = self.write()?;
        let agent = state.agent_mut(task_id)?;
        let follow_up = slot(&mut agent.follow_ups, follow_up_id).ok_or_else(|| {
            FleetError::FollowUpNotFound { task_id: task_id.to_string(), follow_up_id }
        })?;
        follow_up.answer = Some(answer.to_string());
        follow_up.answered_at = Some(Utc::now());
        state.record(EventKind::FollowUpAnswered, task_id);
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Unspawned tasks whose dependencies have all completed, in declaration
    /// order.
    pub fn get_ready_tasks(&self) -> Vec<Task> {
        let state = self.read();
        let completed: HashSet<&str> = state.completed_tasks.iter().map(String::as_str).collect();
        state
            .workflow
            .tasks
            .iter()
            .filter(|task| !state.agents.contains_key(&task.id))
            .filter(|task| task.depends_on.iter().all(|d| completed.contains(d.as_str())))
            .cloned()
            .collect()
    }

    /// A copy of the output cache, safe to use after the lock is released.
    pub fn get_outputs(&self) -> BTreeMap<String, String> {
        self.read().outputs_cache.clone()
    }

    /// True once every declared task has completed. Failed tasks never
    /// count, so a session blocked by a failure never satisfies this.
    pub fn is_complete(&self) -> bool {
        let state = self.read();
        state.completed_tasks.len() == state.workflow.tasks.len()
    }

    /// Completed tasks as a percentage of declared tasks.
    pub fn get_progress(&self) -> f64 {
        let state = self.read();
        let total = state.workflow.tasks.len();
        if total == 0 {
            return 100.0;
        }
        state.completed_tasks.len() as f64 / total as f64 * 100.0
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.read().workflow.task(task_id).cloned()
    }

    pub fn agent(&self, task_id: &str) -> Option<AgentState> {
        self.read().agents.get(task_id).cloned()
    }

    /// Agents still in the `Running` state.
    pub fn active_agents(&self) -> Vec<AgentState> {
        self.read()
            .agents
            .values()
            .filter(|a| a.status == TaskStatus::Running)
            .cloned()
            .collect()
    }

    /// Ids of tasks that failed, in task-id order.
    pub fn failed_tasks(&self) -> Vec<String> {
        self.read()
            .agents
            .values()
            .filter(|a| a.status == TaskStatus::Failed)
            .map(|a| a.task_id.clone())
            .collect()
    }

    pub fn completed_tasks(&self) -> Vec<String> {
        self.read().completed_tasks.clone()
    }

    /// The last `n` events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<FileEvent> {
        let state = self.read();
        let skip = state.events.len().saturating_sub(n);
        state.events[skip..].to_vec()
    }

    pub fn session_id(&self) -> String {
        self.read().session_id.clone()
    }

    pub fn plan(&self) -> String {
        self.read().plan.clone()
    }

    pub fn workflow(&self) -> Workflow {
        self.read().workflow.clone()
    }

    /// A consistent copy of the entire state.
    pub fn snapshot(&self) -> SessionState {
        self.read().clone()
    }
}

fn new_question(id: u32, text: &str) -> Question {
    Question { id, text: text.to_string(), asked_at: Utc::now(), answer: None, answered_at: None }
}

fn next_id(len: usize) -> u32 {
    u32::try_from(len + 1).unwrap_or(u32::MAX)
}

/// The element with 1-based `id`, if in range.
fn slot<T>(items: &mut [T], id: u32) -> Option<&mut T> {
    let index = usize::try_from(id).ok()?.checked_sub(1)?;
    items.get_mut(index)
}
