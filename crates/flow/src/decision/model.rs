//! Decisions: the commands a decision task sends back to the remote service

use serde::{Deserialize, Serialize};

use crate::history::{ActivityType, WorkflowType};

/// Attributes of a schedule-activity decision, in wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleActivityTaskAttributes {
    pub activity_type: ActivityType,
    pub activity_id: String,
    pub input: Option<String>,
    pub control: Option<String>,
    pub task_list: Option<String>,
    pub task_priority: Option<String>,
    pub schedule_to_start_timeout: Option<String>,
    pub schedule_to_close_timeout: Option<String>,
    pub start_to_close_timeout: Option<String>,
    pub heartbeat_timeout: Option<String>,
}

/// Attributes of a start-child-workflow decision, in wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChildWorkflowExecutionAttributes {
    pub workflow_type: WorkflowType,
    pub workflow_id: String,
    pub input: Option<String>,
    pub control: Option<String>,
    pub task_list: Option<String>,
    pub task_priority: Option<String>,
    pub execution_start_to_close_timeout: Option<String>,
    pub task_start_to_close_timeout: Option<String>,
    pub child_policy: Option<String>,
    pub tag_list: Vec<String>,
}

/// Attributes of a continue-as-new decision, in wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueAsNewWorkflowExecutionAttributes {
    pub input: Option<String>,
    pub workflow_type_version: Option<String>,
    pub task_list: Option<String>,
    pub task_priority: Option<String>,
    pub execution_start_to_close_timeout: Option<String>,
    pub task_start_to_close_timeout: Option<String>,
    pub child_policy: Option<String>,
    pub tag_list: Vec<String>,
}

/// One command emitted in response to a decision task
///
/// Decisions are immutable once appended to a
/// [`Decisions`](super::Decisions) buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decisionType")]
pub enum Decision {
    ScheduleActivityTask(ScheduleActivityTaskAttributes),

    #[serde(rename_all = "camelCase")]
    RequestCancelActivityTask { activity_id: String },

    #[serde(rename_all = "camelCase")]
    CompleteWorkflowExecution { result: Option<String> },

    #[serde(rename_all = "camelCase")]
    FailWorkflowExecution {
        reason: Option<String>,
        details: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    CancelWorkflowExecution { details: Option<String> },

    ContinueAsNewWorkflowExecution(ContinueAsNewWorkflowExecutionAttributes),

    #[serde(rename_all = "camelCase")]
    StartTimer {
        timer_id: String,
        start_to_fire_timeout: String,
        control: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    CancelTimer { timer_id: String },

    #[serde(rename_all = "camelCase")]
    RecordMarker {
        marker_name: String,
        details: Option<String>,
    },

    StartChildWorkflowExecution(StartChildWorkflowExecutionAttributes),

    #[serde(rename_all = "camelCase")]
    RequestCancelExternalWorkflowExecution {
        workflow_id: String,
        run_id: Option<String>,
        control: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    SignalExternalWorkflowExecution {
        workflow_id: String,
        run_id: Option<String>,
        signal_name: String,
        input: Option<String>,
        control: Option<String>,
    },
}

impl Decision {
    /// Wire name of the decision type
    pub fn decision_type(&self) -> &'static str {
        match self {
            Self::ScheduleActivityTask(_) => "ScheduleActivityTask",
            Self::RequestCancelActivityTask { .. } => "RequestCancelActivityTask",
            Self::CompleteWorkflowExecution { .. } => "CompleteWorkflowExecution",
            Self::FailWorkflowExecution { .. } => "FailWorkflowExecution",
            Self::CancelWorkflowExecution { .. } => "CancelWorkflowExecution",
            Self::ContinueAsNewWorkflowExecution(_) => "ContinueAsNewWorkflowExecution",
            Self::StartTimer { .. } => "StartTimer",
            Self::CancelTimer { .. } => "CancelTimer",
            Self::RecordMarker { .. } => "RecordMarker",
            Self::StartChildWorkflowExecution(_) => "StartChildWorkflowExecution",
            Self::RequestCancelExternalWorkflowExecution { .. } => {
                "RequestCancelExternalWorkflowExecution"
            }
            Self::SignalExternalWorkflowExecution { .. } => "SignalExternalWorkflowExecution",
        }
    }

    /// Whether this decision closes (or restarts) the execution
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflowExecution { .. }
                | Self::FailWorkflowExecution { .. }
                | Self::CancelWorkflowExecution { .. }
                | Self::ContinueAsNewWorkflowExecution(_)
        )
    }

    /// Whether this decision may be submitted in the same batch as a close decision
    pub fn is_compatible_with_close(&self) -> bool {
        matches!(
            self,
            Self::CancelTimer { .. }
                | Self::RecordMarker { .. }
                | Self::StartChildWorkflowExecution(_)
                | Self::RequestCancelExternalWorkflowExecution { .. }
        )
    }
}
