//! Typed view over one history record

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{ActivityType, EventAttributes, EventType, HistoryEvent, WorkflowType};
use super::WorkflowHistory;

/// Partition of event kinds used to derive contextual names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Activity,
    Timer,
    WorkflowExecution,
    ChildWorkflow,
    Decision,
    Marker,
    Signal,
    ExternalWorkflowSignal,
    ExternalWorkflowCancel,
    Lambda,
}

impl EventCategory {
    /// Category of an event kind, `None` for [`EventType::Unknown`]
    pub fn of(event_type: EventType) -> Option<Self> {
        use EventType::*;

        let category = match event_type {
            WorkflowExecutionStarted
            | WorkflowExecutionCancelRequested
            | WorkflowExecutionCompleted
            | CompleteWorkflowExecutionFailed
            | WorkflowExecutionFailed
            | FailWorkflowExecutionFailed
            | WorkflowExecutionTimedOut
            | WorkflowExecutionCanceled
            | CancelWorkflowExecutionFailed
            | WorkflowExecutionContinuedAsNew
            | ContinueAsNewWorkflowExecutionFailed
            | WorkflowExecutionTerminated => Self::WorkflowExecution,

            WorkflowExecutionSignaled => Self::Signal,

            DecisionTaskScheduled | DecisionTaskStarted | DecisionTaskCompleted
            | DecisionTaskTimedOut => Self::Decision,

            ActivityTaskScheduled
            | ScheduleActivityTaskFailed
            | ActivityTaskStarted
            | ActivityTaskCompleted
            | ActivityTaskFailed
            | ActivityTaskTimedOut
            | ActivityTaskCanceled
            | ActivityTaskCancelRequested
            | RequestCancelActivityTaskFailed => Self::Activity,

            MarkerRecorded | RecordMarkerFailed => Self::Marker,

            TimerStarted | StartTimerFailed | TimerFired | TimerCanceled | CancelTimerFailed => {
                Self::Timer
            }

            StartChildWorkflowExecutionInitiated
            | StartChildWorkflowExecutionFailed
            | ChildWorkflowExecutionStarted
            | ChildWorkflowExecutionCompleted
            | ChildWorkflowExecutionFailed
            | ChildWorkflowExecutionTimedOut
            | ChildWorkflowExecutionCanceled
            | ChildWorkflowExecutionTerminated => Self::ChildWorkflow,

            SignalExternalWorkflowExecutionInitiated
            | SignalExternalWorkflowExecutionFailed
            | ExternalWorkflowExecutionSignaled => Self::ExternalWorkflowSignal,

            RequestCancelExternalWorkflowExecutionInitiated
            | RequestCancelExternalWorkflowExecutionFailed
            | ExternalWorkflowExecutionCancelRequested => Self::ExternalWorkflowCancel,

            LambdaFunctionScheduled
            | ScheduleLambdaFunctionFailed
            | LambdaFunctionStarted
            | StartLambdaFunctionFailed
            | LambdaFunctionCompleted
            | LambdaFunctionFailed
            | LambdaFunctionTimedOut => Self::Lambda,

            Unknown => return None,
        };

        Some(category)
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Activity => "activity",
            Self::Timer => "timer",
            Self::WorkflowExecution => "workflow_execution",
            Self::ChildWorkflow => "child_workflow",
            Self::Decision => "decision",
            Self::Marker => "marker",
            Self::Signal => "signal",
            Self::ExternalWorkflowSignal => "external_workflow_signal",
            Self::ExternalWorkflowCancel => "external_workflow_cancel",
            Self::Lambda => "lambda",
        };
        f.write_str(name)
    }
}

/// Errors raised while interpreting history records
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The record kind is not one this crate interprets
    #[error("unsupported event kind {event_type} (event {event_id})")]
    UnsupportedEventKind { event_id: i64, event_type: EventType },

    /// A field required for this kind could not be resolved
    #[error("event {event_id} ({event_type}) is missing {field}")]
    MissingField {
        event_id: i64,
        event_type: EventType,
        field: &'static str,
    },

    /// A category-specific accessor was used on an event of another category
    #[error("event {event_id} is a {actual} event, expected {expected}")]
    WrongCategory {
        event_id: i64,
        expected: EventCategory,
        actual: EventCategory,
    },

    /// An id that does not exist in the history
    #[error("event {0} not found in history")]
    UnknownEventId(i64),

    /// Record ids must be strictly increasing
    #[error("history ids not strictly increasing: {previous} followed by {next}")]
    NonMonotonicIds { previous: i64, next: i64 },
}

/// Enriched, typed view of one history record
///
/// Fields that belong to an earlier record (an activity's input lives on its
/// scheduled record, a timer's control on its started record) are resolved
/// by following [`initiating_event_id`](Self::initiating_event_id) through
/// the owning history. Every hop strictly decreases the id, so resolution
/// always terminates.
#[derive(Clone, Copy)]
pub struct WorkflowEvent<'h> {
    history: &'h WorkflowHistory,
    record: &'h HistoryEvent,
}

impl<'h> WorkflowEvent<'h> {
    pub(crate) fn new(history: &'h WorkflowHistory, record: &'h HistoryEvent) -> Self {
        Self { history, record }
    }

    pub fn id(&self) -> i64 {
        self.record.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.record.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.record.event_timestamp
    }

    /// The underlying raw record
    pub fn record(&self) -> &'h HistoryEvent {
        self.record
    }

    pub fn attributes(&self) -> &'h EventAttributes {
        &self.record.attributes
    }

    pub fn history(&self) -> &'h WorkflowHistory {
        self.history
    }

    /// Category of this event
    ///
    /// # Errors
    ///
    /// [`EventError::UnsupportedEventKind`] for kinds outside the known set.
    pub fn category(&self) -> Result<EventCategory, EventError> {
        EventCategory::of(self.event_type()).ok_or(EventError::UnsupportedEventKind {
            event_id: self.id(),
            event_type: self.event_type(),
        })
    }

    /// Id of the record that initiated this one (own id for initiators)
    pub fn initiating_event_id(&self) -> i64 {
        use EventType::*;

        let attrs = self.attributes();
        let reference = match self.event_type() {
            ActivityTaskStarted
            | ActivityTaskCompleted
            | ActivityTaskFailed
            | ActivityTaskTimedOut
            | ActivityTaskCanceled
            | LambdaFunctionStarted
            | StartLambdaFunctionFailed
            | LambdaFunctionCompleted
            | LambdaFunctionFailed
            | LambdaFunctionTimedOut
            | DecisionTaskStarted
            | DecisionTaskCompleted
            | DecisionTaskTimedOut => attrs.scheduled_event_id,

            TimerFired | TimerCanceled => attrs.started_event_id,

            StartChildWorkflowExecutionFailed
            | ChildWorkflowExecutionStarted
            | ChildWorkflowExecutionCompleted
            | ChildWorkflowExecutionFailed
            | ChildWorkflowExecutionTimedOut
            | ChildWorkflowExecutionCanceled
            | ChildWorkflowExecutionTerminated
            | SignalExternalWorkflowExecutionFailed
            | ExternalWorkflowExecutionSignaled
            | RequestCancelExternalWorkflowExecutionFailed
            | ExternalWorkflowExecutionCancelRequested => attrs.initiated_event_id,

            _ => None,
        };

        reference.unwrap_or(self.id())
    }

    /// The initiating event, or `None` when this event is its own initiator
    /// or the initiator is not part of the history
    pub fn initiating_event(&self) -> Option<WorkflowEvent<'h>> {
        let id = self.initiating_event_id();
        if id == self.id() {
            return None;
        }
        self.history.get(id)
    }

    /// Resolve a field by walking the initiating-event chain
    ///
    /// Returns the value from the first event on the chain that carries it.
    pub fn resolve<T>(&self, field: impl Fn(&'h EventAttributes) -> Option<T>) -> Option<T> {
        let mut current = *self;
        loop {
            if let Some(value) = field(current.attributes()) {
                return Some(value);
            }
            let next_id = current.initiating_event_id();
            if next_id >= current.id() {
                return None;
            }
            current = self.history.get(next_id)?;
        }
    }

    pub fn input(&self) -> Option<&'h str> {
        self.resolve(|a| a.input.as_deref())
    }

    pub fn output(&self) -> Option<&'h str> {
        self.resolve(|a| a.result.as_deref())
    }

    pub fn reason(&self) -> Option<&'h str> {
        self.resolve(|a| a.reason.as_deref())
    }

    pub fn details(&self) -> Option<&'h str> {
        self.resolve(|a| a.details.as_deref())
    }

    pub fn cause(&self) -> Option<&'h str> {
        self.resolve(|a| a.cause.as_deref())
    }

    pub fn control(&self) -> Option<&'h str> {
        self.resolve(|a| a.control.as_deref())
    }

    pub fn signal_name(&self) -> Option<&'h str> {
        self.resolve(|a| a.signal_name.as_deref())
    }

    pub fn timer_id(&self) -> Option<&'h str> {
        self.resolve(|a| a.timer_id.as_deref())
    }

    pub fn marker_name(&self) -> Option<&'h str> {
        self.resolve(|a| a.marker_name.as_deref())
    }

    pub fn activity_type(&self) -> Option<&'h ActivityType> {
        self.resolve(|a| a.activity_type.as_ref())
    }

    pub fn activity_id(&self) -> Option<&'h str> {
        self.resolve(|a| a.activity_id.as_deref())
    }

    /// Workflow type carried by this record or its initiator
    ///
    /// For child workflow events this is the child's type.
    pub fn workflow_type(&self) -> Option<&'h WorkflowType> {
        self.resolve(|a| a.workflow_type.as_ref())
    }

    /// Workflow id of the child or external execution this event refers to
    pub fn workflow_id(&self) -> Option<&'h str> {
        self.resolve(|a| {
            a.workflow_execution
                .as_ref()
                .map(|e| e.workflow_id.as_str())
                .or(a.workflow_id.as_deref())
        })
    }

    /// Run id of the child or external execution this event refers to
    pub fn run_id(&self) -> Option<&'h str> {
        self.resolve(|a| {
            a.workflow_execution
                .as_ref()
                .map(|e| e.run_id.as_str())
                .or(a.run_id.as_deref())
        })
    }

    pub fn lambda_name(&self) -> Option<&'h str> {
        self.resolve(|a| a.lambda_name.as_deref())
    }

    pub fn lambda_id(&self) -> Option<&'h str> {
        self.resolve(|a| a.lambda_id.as_deref())
    }

    /// Run id of the execution that replaced this one on continue-as-new
    pub fn new_execution_run_id(&self) -> Option<&'h str> {
        self.attributes().new_execution_run_id.as_deref()
    }

    /// Turn an absent field into [`EventError::MissingField`]
    pub fn require<T>(&self, value: Option<T>, field: &'static str) -> Result<T, EventError> {
        value.ok_or(EventError::MissingField {
            event_id: self.id(),
            event_type: self.event_type(),
            field,
        })
    }
}

impl fmt::Debug for WorkflowEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEvent")
            .field("id", &self.id())
            .field("event_type", &self.event_type())
            .finish()
    }
}
