//! In-memory implementation of WorkflowService for testing

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use super::client::*;
use crate::decision::Decision;
use crate::history::{ActivityType, EventType, HistoryEvent, WorkflowExecution, WorkflowType};

/// A decision task waiting to be polled
#[derive(Debug, Clone)]
pub struct ScriptedDecisionTask {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub previous_started_event_id: i64,
    pub events: Vec<HistoryEvent>,
}

impl ScriptedDecisionTask {
    pub fn new(
        workflow_execution: WorkflowExecution,
        workflow_type: WorkflowType,
        events: Vec<HistoryEvent>,
    ) -> Self {
        Self {
            workflow_execution,
            workflow_type,
            previous_started_event_id: 0,
            events,
        }
    }

    /// Set the cursor left by the previous decision task
    pub fn with_previous_started_event_id(mut self, event_id: i64) -> Self {
        self.previous_started_event_id = event_id;
        self
    }

    /// Id of the newest `DecisionTaskStarted` record, or the last id
    fn started_event_id(&self) -> i64 {
        self.events
            .iter()
            .rev()
            .find(|e| e.event_type == EventType::DecisionTaskStarted)
            .or(self.events.last())
            .map(|e| e.event_id)
            .unwrap_or(0)
    }
}

/// A recorded `respond_decision_task_completed` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub task_token: String,
    pub decisions: Vec<Decision>,
    pub execution_context: Option<String>,
}

/// How an activity task was reported back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActivityOutcome {
    Completed {
        task_token: String,
        result: Option<String>,
    },
    Failed {
        task_token: String,
        reason: String,
        details: Option<String>,
    },
}

impl ActivityOutcome {
    pub fn task_token(&self) -> &str {
        match self {
            Self::Completed { task_token, .. } | Self::Failed { task_token, .. } => task_token,
        }
    }
}

#[derive(Default)]
struct State {
    decision_queue: VecDeque<ScriptedDecisionTask>,
    outstanding_decisions: HashMap<String, ScriptedDecisionTask>,
    activity_queue: VecDeque<ActivityTask>,
    outstanding_activities: HashSet<String>,
    decision_responses: Vec<DecisionResponse>,
    activity_outcomes: Vec<ActivityOutcome>,
    injected_failures: VecDeque<ServiceError>,
}

/// In-memory implementation of WorkflowService
///
/// Serves scripted decision tasks split into pages, hands out activity tasks
/// from a queue, validates task tokens and records every response. Polls
/// wait up to the configured window for work before returning `None`.
///
/// # Example
///
/// ```
/// use everruns_flow::InMemoryWorkflowService;
/// use std::time::Duration;
///
/// let service = InMemoryWorkflowService::new()
///     .with_page_size(100)
///     .with_poll_wait(Duration::from_millis(50));
/// ```
pub struct InMemoryWorkflowService {
    state: Mutex<State>,
    decision_ready: Notify,
    activity_ready: Notify,
    page_size: usize,
    poll_wait: Duration,
    decision_polls: AtomicUsize,
}

impl InMemoryWorkflowService {
    /// Create a new in-memory service
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            decision_ready: Notify::new(),
            activity_ready: Notify::new(),
            page_size: 1000,
            poll_wait: Duration::from_secs(60),
            decision_polls: AtomicUsize::new(0),
        }
    }

    /// Set the maximum number of history records per page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set how long a poll waits for work before returning `None`
    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    /// Queue a decision task
    pub fn enqueue_decision_task(&self, task: ScriptedDecisionTask) {
        self.state.lock().decision_queue.push_back(task);
        self.decision_ready.notify_one();
    }

    /// Queue an activity task and return its task token
    pub fn enqueue_activity_task(
        &self,
        workflow_execution: WorkflowExecution,
        activity_type: ActivityType,
        input: Option<String>,
    ) -> String {
        let task_token = Uuid::now_v7().to_string();
        let task = ActivityTask {
            task_token: task_token.clone(),
            activity_id: Uuid::now_v7().to_string(),
            activity_type,
            workflow_execution,
            input,
        };
        self.state.lock().activity_queue.push_back(task);
        self.activity_ready.notify_one();
        task_token
    }

    /// Make the next service call fail with `error`
    pub fn inject_failure(&self, error: ServiceError) {
        self.state.lock().injected_failures.push_back(error);
    }

    pub fn decision_responses(&self) -> Vec<DecisionResponse> {
        self.state.lock().decision_responses.clone()
    }

    pub fn activity_outcomes(&self) -> Vec<ActivityOutcome> {
        self.state.lock().activity_outcomes.clone()
    }

    /// Decision tasks polled but not yet responded to
    pub fn outstanding_decision_tasks(&self) -> usize {
        self.state.lock().outstanding_decisions.len()
    }

    pub fn pending_activity_tasks(&self) -> usize {
        self.state.lock().activity_queue.len()
    }

    /// Number of decision polls served, including page fetches
    pub fn decision_poll_count(&self) -> usize {
        self.decision_polls.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> Result<(), ServiceError> {
        match self.state.lock().injected_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn page(
        &self,
        task_token: &str,
        task: &ScriptedDecisionTask,
        offset: usize,
    ) -> DecisionTaskPage {
        let end = (offset + self.page_size).min(task.events.len());
        let next_page_token = (end < task.events.len()).then(|| format!("{task_token}#{end}"));

        DecisionTaskPage {
            task_token: task_token.to_string(),
            workflow_execution: task.workflow_execution.clone(),
            workflow_type: task.workflow_type.clone(),
            previous_started_event_id: task.previous_started_event_id,
            started_event_id: task.started_event_id(),
            events: task.events[offset..end].to_vec(),
            next_page_token,
        }
    }

    fn next_page(&self, page_token: &str) -> Result<DecisionTaskPage, ServiceError> {
        let unknown = || ServiceError::UnknownResource(format!("page token {page_token}"));

        let (task_token, offset) = page_token.rsplit_once('#').ok_or_else(unknown)?;
        let offset: usize = offset.parse().map_err(|_| unknown())?;

        let state = self.state.lock();
        let task = state.outstanding_decisions.get(task_token).ok_or_else(unknown)?;
        if offset >= task.events.len() {
            return Err(unknown());
        }
        Ok(self.page(task_token, task, offset))
    }

    fn claim_decision_task(&self) -> Option<DecisionTaskPage> {
        let mut state = self.state.lock();
        let task = state.decision_queue.pop_front()?;
        let task_token = Uuid::now_v7().to_string();
        let page = self.page(&task_token, &task, 0);
        state.outstanding_decisions.insert(task_token, task);
        Some(page)
    }

    fn claim_activity_task(&self) -> Option<ActivityTask> {
        let mut state = self.state.lock();
        let task = state.activity_queue.pop_front()?;
        state.outstanding_activities.insert(task.task_token.clone());
        Some(task)
    }

    fn finish_activity(&self, outcome: ActivityOutcome) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        if !state.outstanding_activities.remove(outcome.task_token()) {
            return Err(ServiceError::UnknownResource(format!(
                "activity task token {}",
                outcome.task_token()
            )));
        }
        state.activity_outcomes.push(outcome);
        Ok(())
    }
}

impl Default for InMemoryWorkflowService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowService for InMemoryWorkflowService {
    async fn poll_for_decision_task(
        &self,
        request: &PollDecisionTaskRequest,
    ) -> Result<Option<DecisionTaskPage>, ServiceError> {
        self.take_injected_failure()?;
        self.decision_polls.fetch_add(1, Ordering::SeqCst);

        if let Some(page_token) = &request.next_page_token {
            return self.next_page(page_token).map(Some);
        }

        let deadline = tokio::time::Instant::now() + self.poll_wait;
        loop {
            if let Some(page) = self.claim_decision_task() {
                return Ok(Some(page));
            }
            if tokio::time::timeout_at(deadline, self.decision_ready.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn poll_for_activity_task(
        &self,
        _request: &PollActivityTaskRequest,
    ) -> Result<Option<ActivityTask>, ServiceError> {
        self.take_injected_failure()?;

        let deadline = tokio::time::Instant::now() + self.poll_wait;
        loop {
            if let Some(task) = self.claim_activity_task() {
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, self.activity_ready.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        execution_context: Option<String>,
    ) -> Result<(), ServiceError> {
        self.take_injected_failure()?;

        let mut state = self.state.lock();
        if state.outstanding_decisions.remove(task_token).is_none() {
            return Err(ServiceError::UnknownResource(format!(
                "decision task token {task_token}"
            )));
        }
        state.decision_responses.push(DecisionResponse {
            task_token: task_token.to_string(),
            decisions,
            execution_context,
        });
        Ok(())
    }

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Option<String>,
    ) -> Result<(), ServiceError> {
        self.take_injected_failure()?;
        self.finish_activity(ActivityOutcome::Completed {
            task_token: task_token.to_string(),
            result,
        })
    }

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: &str,
        details: Option<String>,
    ) -> Result<(), ServiceError> {
        self.take_injected_failure()?;
        self.finish_activity(ActivityOutcome::Failed {
            task_token: task_token.to_string(),
            reason: reason.to_string(),
            details,
        })
    }
}
