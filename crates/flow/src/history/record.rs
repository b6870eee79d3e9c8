//! Raw history records as reported by the remote service

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a history record
///
/// Variant names match the wire names. Kinds this crate does not know about
/// deserialize to [`EventType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // =========================================================================
    // Workflow Execution
    // =========================================================================
    WorkflowExecutionStarted,
    WorkflowExecutionCancelRequested,
    WorkflowExecutionCompleted,
    CompleteWorkflowExecutionFailed,
    WorkflowExecutionFailed,
    FailWorkflowExecutionFailed,
    WorkflowExecutionTimedOut,
    WorkflowExecutionCanceled,
    CancelWorkflowExecutionFailed,
    WorkflowExecutionContinuedAsNew,
    ContinueAsNewWorkflowExecutionFailed,
    WorkflowExecutionTerminated,

    // =========================================================================
    // Signal
    // =========================================================================
    WorkflowExecutionSignaled,

    // =========================================================================
    // Decision Task
    // =========================================================================
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,

    // =========================================================================
    // Activity Task
    // =========================================================================
    ActivityTaskScheduled,
    ScheduleActivityTaskFailed,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskCanceled,
    ActivityTaskCancelRequested,
    RequestCancelActivityTaskFailed,

    // =========================================================================
    // Marker
    // =========================================================================
    MarkerRecorded,
    RecordMarkerFailed,

    // =========================================================================
    // Timer
    // =========================================================================
    TimerStarted,
    StartTimerFailed,
    TimerFired,
    TimerCanceled,
    CancelTimerFailed,

    // =========================================================================
    // Child Workflow
    // =========================================================================
    StartChildWorkflowExecutionInitiated,
    StartChildWorkflowExecutionFailed,
    ChildWorkflowExecutionStarted,
    ChildWorkflowExecutionCompleted,
    ChildWorkflowExecutionFailed,
    ChildWorkflowExecutionTimedOut,
    ChildWorkflowExecutionCanceled,
    ChildWorkflowExecutionTerminated,

    // =========================================================================
    // External Workflow Signal
    // =========================================================================
    SignalExternalWorkflowExecutionInitiated,
    SignalExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionSignaled,

    // =========================================================================
    // External Workflow Cancel
    // =========================================================================
    RequestCancelExternalWorkflowExecutionInitiated,
    RequestCancelExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionCancelRequested,

    // =========================================================================
    // Lambda Function
    // =========================================================================
    LambdaFunctionScheduled,
    ScheduleLambdaFunctionFailed,
    LambdaFunctionStarted,
    StartLambdaFunctionFailed,
    LambdaFunctionCompleted,
    LambdaFunctionFailed,
    LambdaFunctionTimedOut,

    /// Any kind not listed above
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Whether this kind reports the rejection of a close decision
    pub fn is_close_rejection(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflowExecutionFailed
                | Self::FailWorkflowExecutionFailed
                | Self::CancelWorkflowExecutionFailed
                | Self::ContinueAsNewWorkflowExecutionFailed
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Registered activity type identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityType {
    pub name: String,
    pub version: String,
}

impl ActivityType {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Registered workflow type identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
    pub version: String,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// A workflow execution: workflow id plus the run id of one run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Kind-specific payload of a history record
///
/// The remote service attaches exactly one attribute object per record; the
/// union of their fields is flattened here. Fields a kind does not carry are
/// `None`. Durations are kept in their wire encoding (seconds or `"NONE"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventAttributes {
    // Payloads (already serialized by the producer)
    pub input: Option<String>,
    pub result: Option<String>,
    pub reason: Option<String>,
    pub details: Option<String>,
    pub cause: Option<String>,
    pub control: Option<String>,

    // Identities
    pub activity_type: Option<ActivityType>,
    pub activity_id: Option<String>,
    pub workflow_type: Option<WorkflowType>,
    pub workflow_execution: Option<WorkflowExecution>,
    pub workflow_id: Option<String>,
    pub run_id: Option<String>,
    pub timer_id: Option<String>,
    pub marker_name: Option<String>,
    pub signal_name: Option<String>,
    pub lambda_id: Option<String>,
    pub lambda_name: Option<String>,

    // References to earlier records
    pub scheduled_event_id: Option<i64>,
    pub started_event_id: Option<i64>,
    pub initiated_event_id: Option<i64>,
    pub decision_task_completed_event_id: Option<i64>,

    // Scheduling options
    pub task_list: Option<String>,
    pub task_priority: Option<String>,
    pub schedule_to_start_timeout: Option<String>,
    pub schedule_to_close_timeout: Option<String>,
    pub start_to_close_timeout: Option<String>,
    pub heartbeat_timeout: Option<String>,
    pub start_to_fire_timeout: Option<String>,
    pub execution_start_to_close_timeout: Option<String>,
    pub task_start_to_close_timeout: Option<String>,
    pub child_policy: Option<String>,
    pub tag_list: Option<Vec<String>>,
    pub timeout_type: Option<String>,
    pub new_execution_run_id: Option<String>,
}

/// One immutable fact reported by the remote service
///
/// Ids are 1-based, strictly increasing within an execution and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub event_id: i64,
    pub event_type: EventType,
    pub event_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn new(event_id: i64, event_type: EventType, attributes: EventAttributes) -> Self {
        Self {
            event_id,
            event_type,
            event_timestamp: Utc::now(),
            attributes,
        }
    }
}
