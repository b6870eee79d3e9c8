//! WorkflowService trait: the remote protocol this crate drives

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::history::{ActivityType, HistoryEvent, WorkflowExecution, WorkflowType};

/// Error type for remote service calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request rate exceeded
    #[error("throttled: {0}")]
    Throttled(String),

    /// Task token, execution or domain no longer known to the service
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// The service rejected the request as malformed
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure inside the service
    #[error("internal service error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the call may succeed if simply repeated
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Throttled(_) | Self::Internal(_)
        )
    }
}

/// Long-poll request for a decision task (or the next page of one)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDecisionTaskRequest {
    pub domain: String,
    pub task_list: String,
    pub identity: String,

    /// Continuation token from a previous page of the same task
    pub next_page_token: Option<String>,
}

impl PollDecisionTaskRequest {
    pub fn new(
        domain: impl Into<String>,
        task_list: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            task_list: task_list.into(),
            identity: identity.into(),
            next_page_token: None,
        }
    }

    /// Same request, continuing at `token`
    pub fn with_page_token(&self, token: impl Into<String>) -> Self {
        Self {
            next_page_token: Some(token.into()),
            ..self.clone()
        }
    }
}

/// One page of a polled decision task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTaskPage {
    /// Opaque token identifying the task when responding
    pub task_token: String,
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,

    /// Id of the last event seen by the previous decision task (0 for the first)
    pub previous_started_event_id: i64,

    /// Id of the `DecisionTaskStarted` event for this task
    pub started_event_id: i64,

    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<String>,
}

/// Long-poll request for an activity task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollActivityTaskRequest {
    pub domain: String,
    pub task_list: String,
    pub identity: String,
}

impl PollActivityTaskRequest {
    pub fn new(
        domain: impl Into<String>,
        task_list: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            task_list: task_list.into(),
            identity: identity.into(),
        }
    }
}

/// A polled unit of activity work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTask {
    pub task_token: String,
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub workflow_execution: WorkflowExecution,
    pub input: Option<String>,
}

/// Remote workflow-history service
///
/// A poll returning `Ok(None)` means the long-poll window elapsed with no
/// task available; that is a normal, expected outcome.
#[async_trait]
pub trait WorkflowService: Send + Sync + 'static {
    /// Long-poll for a decision task, or fetch the next page of one
    async fn poll_for_decision_task(
        &self,
        request: &PollDecisionTaskRequest,
    ) -> Result<Option<DecisionTaskPage>, ServiceError>;

    /// Long-poll for an activity task
    async fn poll_for_activity_task(
        &self,
        request: &PollActivityTaskRequest,
    ) -> Result<Option<ActivityTask>, ServiceError>;

    /// Complete a decision task with an ordered list of decisions
    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        execution_context: Option<String>,
    ) -> Result<(), ServiceError>;

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Option<String>,
    ) -> Result<(), ServiceError>;

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: &str,
        details: Option<String>,
    ) -> Result<(), ServiceError>;
}
