//! Decisions accumulator for one decision task

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use super::model::{
    ContinueAsNewWorkflowExecutionAttributes, Decision, ScheduleActivityTaskAttributes,
    StartChildWorkflowExecutionAttributes,
};
use super::options::{ActivityOptions, ExecutionOptions};
use crate::codec::{encode_duration, to_payload, CodecError, DurationTransform, Serializer};
use crate::history::{ActivityType, EventType, WorkflowEvent, WorkflowType};

/// Errors from building decisions
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// Payload could not be serialized
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Arguments do not describe a valid decision
    #[error("invalid decision: {0}")]
    Invalid(String),
}

/// Append-only, ordered output buffer for one decision task
///
/// Every mutating method appends exactly one [`Decision`] and returns the
/// buffer for chaining. Payloads go through the configured [`Serializer`]
/// and durations through the configured [`DurationTransform`].
///
/// # Example
///
/// ```ignore
/// decisions
///     .record_marker("checkpoint", &state)?
///     .complete_workflow(&output)?;
/// ```
pub struct Decisions {
    decisions: Vec<Decision>,
    execution_context: Option<String>,
    serializer: Arc<dyn Serializer>,
    durations: Arc<dyn DurationTransform>,
}

impl Decisions {
    /// Create an empty buffer
    pub fn new(serializer: Arc<dyn Serializer>, durations: Arc<dyn DurationTransform>) -> Self {
        Self {
            decisions: Vec::new(),
            execution_context: None,
            serializer,
            durations,
        }
    }

    pub fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn as_slice(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter()
    }

    pub fn has_close_decision(&self) -> bool {
        self.decisions.iter().any(Decision::is_close)
    }

    /// Consume the buffer, yielding decisions in append order
    pub fn into_inner(self) -> Vec<Decision> {
        self.decisions
    }

    /// Consume the buffer, yielding decisions and the execution context
    pub fn into_parts(self) -> (Vec<Decision>, Option<String>) {
        (self.decisions, self.execution_context)
    }

    pub fn execution_context(&self) -> Option<&str> {
        self.execution_context.as_deref()
    }

    /// Attach an execution context to the response; the last call wins
    ///
    /// This does not append a decision.
    pub fn set_execution_context<T: Serialize + ?Sized>(
        &mut self,
        context: &T,
    ) -> Result<&mut Self, DecisionError> {
        self.execution_context = Some(to_payload(self.serializer(), context)?);
        Ok(self)
    }

    /// Append a pre-built decision
    pub fn push(&mut self, decision: Decision) -> &mut Self {
        self.decisions.push(decision);
        self
    }

    // =========================================================================
    // Activities
    // =========================================================================

    /// Schedule an activity under a freshly generated activity id
    pub fn schedule_activity<T: Serialize + ?Sized>(
        &mut self,
        activity_type: &ActivityType,
        input: &T,
        options: &ActivityOptions,
    ) -> Result<&mut Self, DecisionError> {
        let activity_id = Uuid::now_v7().to_string();
        self.schedule_activity_with_id(&activity_id, activity_type, input, options)
    }

    /// Schedule an activity under a caller-chosen activity id
    pub fn schedule_activity_with_id<T: Serialize + ?Sized>(
        &mut self,
        activity_id: &str,
        activity_type: &ActivityType,
        input: &T,
        options: &ActivityOptions,
    ) -> Result<&mut Self, DecisionError> {
        if activity_id.is_empty() {
            return Err(DecisionError::Invalid("activity id is empty".to_string()));
        }

        let input = to_payload(self.serializer(), input)?;
        let attributes = ScheduleActivityTaskAttributes {
            activity_type: activity_type.clone(),
            activity_id: activity_id.to_string(),
            input: Some(input),
            control: None,
            task_list: options.task_list.clone(),
            task_priority: options.priority.map(|p| p.to_string()),
            schedule_to_start_timeout: self.encode(options.schedule_to_start_timeout),
            schedule_to_close_timeout: self.encode(options.schedule_to_close_timeout),
            start_to_close_timeout: self.encode(options.start_to_close_timeout),
            heartbeat_timeout: self.encode(options.heartbeat_timeout),
        };

        Ok(self.push(Decision::ScheduleActivityTask(attributes)))
    }

    /// Schedule again the activity described by an `ActivityTaskScheduled` event
    ///
    /// Input, control, task list and timeouts are copied verbatim from the
    /// record; only the activity id is fresh.
    pub fn reschedule_activity(
        &mut self,
        scheduled: &WorkflowEvent<'_>,
    ) -> Result<&mut Self, DecisionError> {
        if scheduled.event_type() != EventType::ActivityTaskScheduled {
            return Err(DecisionError::Invalid(format!(
                "event {} is {}, not ActivityTaskScheduled",
                scheduled.id(),
                scheduled.event_type()
            )));
        }

        let attrs = scheduled.attributes();
        let activity_type = attrs.activity_type.clone().ok_or_else(|| {
            DecisionError::Invalid(format!("event {} has no activity type", scheduled.id()))
        })?;

        let attributes = ScheduleActivityTaskAttributes {
            activity_type,
            activity_id: Uuid::now_v7().to_string(),
            input: attrs.input.clone(),
            control: attrs.control.clone(),
            task_list: attrs.task_list.clone(),
            task_priority: attrs.task_priority.clone(),
            schedule_to_start_timeout: attrs.schedule_to_start_timeout.clone(),
            schedule_to_close_timeout: attrs.schedule_to_close_timeout.clone(),
            start_to_close_timeout: attrs.start_to_close_timeout.clone(),
            heartbeat_timeout: attrs.heartbeat_timeout.clone(),
        };

        Ok(self.push(Decision::ScheduleActivityTask(attributes)))
    }

    pub fn request_cancel_activity(&mut self, activity_id: &str) -> &mut Self {
        self.push(Decision::RequestCancelActivityTask {
            activity_id: activity_id.to_string(),
        })
    }

    // =========================================================================
    // Workflow close
    // =========================================================================

    pub fn complete_workflow<T: Serialize + ?Sized>(
        &mut self,
        result: &T,
    ) -> Result<&mut Self, DecisionError> {
        let result = to_payload(self.serializer(), result)?;
        Ok(self.push(Decision::CompleteWorkflowExecution {
            result: Some(result),
        }))
    }

    pub fn fail_workflow(&mut self, reason: &str, details: Option<&str>) -> &mut Self {
        self.push(Decision::FailWorkflowExecution {
            reason: Some(reason.to_string()),
            details: details.map(str::to_string),
        })
    }

    pub fn cancel_workflow(&mut self, details: Option<&str>) -> &mut Self {
        self.push(Decision::CancelWorkflowExecution {
            details: details.map(str::to_string),
        })
    }

    pub fn continue_as_new<T: Serialize + ?Sized>(
        &mut self,
        input: &T,
        options: &ExecutionOptions,
    ) -> Result<&mut Self, DecisionError> {
        let input = to_payload(self.serializer(), input)?;
        let attributes = ContinueAsNewWorkflowExecutionAttributes {
            input: Some(input),
            workflow_type_version: options.workflow_type_version.clone(),
            task_list: options.task_list.clone(),
            task_priority: options.priority.map(|p| p.to_string()),
            execution_start_to_close_timeout: self
                .encode(options.execution_start_to_close_timeout),
            task_start_to_close_timeout: self.encode(options.task_start_to_close_timeout),
            child_policy: options.child_policy.clone(),
            tag_list: options.tag_list.clone(),
        };
        Ok(self.push(Decision::ContinueAsNewWorkflowExecution(attributes)))
    }

    // =========================================================================
    // Timers and markers
    // =========================================================================

    pub fn start_timer(
        &mut self,
        timer_id: &str,
        delay: Duration,
    ) -> Result<&mut Self, DecisionError> {
        self.start_timer_inner(timer_id, delay, None)
    }

    /// Start a timer carrying a serialized control payload
    pub fn start_timer_with_control<C: Serialize + ?Sized>(
        &mut self,
        timer_id: &str,
        delay: Duration,
        control: &C,
    ) -> Result<&mut Self, DecisionError> {
        let control = to_payload(self.serializer(), control)?;
        self.start_timer_inner(timer_id, delay, Some(control))
    }

    fn start_timer_inner(
        &mut self,
        timer_id: &str,
        delay: Duration,
        control: Option<String>,
    ) -> Result<&mut Self, DecisionError> {
        if timer_id.is_empty() {
            return Err(DecisionError::Invalid("timer id is empty".to_string()));
        }
        let timeout = encode_duration(Some(self.durations.transform(delay)));
        Ok(self.push(Decision::StartTimer {
            timer_id: timer_id.to_string(),
            start_to_fire_timeout: timeout,
            control,
        }))
    }

    pub fn cancel_timer(&mut self, timer_id: &str) -> &mut Self {
        self.push(Decision::CancelTimer {
            timer_id: timer_id.to_string(),
        })
    }

    pub fn record_marker<T: Serialize + ?Sized>(
        &mut self,
        marker_name: &str,
        details: &T,
    ) -> Result<&mut Self, DecisionError> {
        if marker_name.is_empty() {
            return Err(DecisionError::Invalid("marker name is empty".to_string()));
        }
        let details = to_payload(self.serializer(), details)?;
        Ok(self.push(Decision::RecordMarker {
            marker_name: marker_name.to_string(),
            details: Some(details),
        }))
    }

    // =========================================================================
    // Child and external workflows
    // =========================================================================

    pub fn start_child_workflow<T: Serialize + ?Sized>(
        &mut self,
        workflow_type: &WorkflowType,
        workflow_id: &str,
        input: &T,
        options: &ExecutionOptions,
    ) -> Result<&mut Self, DecisionError> {
        if workflow_id.is_empty() {
            return Err(DecisionError::Invalid("child workflow id is empty".to_string()));
        }
        let input = to_payload(self.serializer(), input)?;
        let attributes = StartChildWorkflowExecutionAttributes {
            workflow_type: workflow_type.clone(),
            workflow_id: workflow_id.to_string(),
            input: Some(input),
            control: None,
            task_list: options.task_list.clone(),
            task_priority: options.priority.map(|p| p.to_string()),
            execution_start_to_close_timeout: self
                .encode(options.execution_start_to_close_timeout),
            task_start_to_close_timeout: self.encode(options.task_start_to_close_timeout),
            child_policy: options.child_policy.clone(),
            tag_list: options.tag_list.clone(),
        };
        Ok(self.push(Decision::StartChildWorkflowExecution(attributes)))
    }

    pub fn request_cancel_external_workflow(
        &mut self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> &mut Self {
        self.push(Decision::RequestCancelExternalWorkflowExecution {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            control: None,
        })
    }

    pub fn signal_external_workflow<T: Serialize + ?Sized>(
        &mut self,
        workflow_id: &str,
        run_id: Option<&str>,
        signal_name: &str,
        input: &T,
    ) -> Result<&mut Self, DecisionError> {
        let input = to_payload(self.serializer(), input)?;
        Ok(self.push(Decision::SignalExternalWorkflowExecution {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            signal_name: signal_name.to_string(),
            input: Some(input),
            control: None,
        }))
    }

    /// Transform and encode an optional duration; absent stays absent
    fn encode(&self, duration: Option<Duration>) -> Option<String> {
        duration.map(|d| encode_duration(Some(self.durations.transform(d))))
    }
}

impl std::fmt::Debug for Decisions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decisions")
            .field("decisions", &self.decisions)
            .field("execution_context", &self.execution_context)
            .finish()
    }
}
