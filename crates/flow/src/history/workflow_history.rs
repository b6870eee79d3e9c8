//! Ordered, id-indexed history of one workflow execution

use super::event::{EventError, WorkflowEvent};
use super::record::{
    ActivityType, EventAttributes, EventType, HistoryEvent, WorkflowExecution, WorkflowType,
};

/// Full ordered log of one execution
///
/// Records are kept in ascending id order; lookup by id is a binary search.
#[derive(Debug, Clone, Default)]
pub struct WorkflowHistory {
    events: Vec<HistoryEvent>,
}

impl WorkflowHistory {
    /// Build a history from records in page order
    ///
    /// # Errors
    ///
    /// [`EventError::NonMonotonicIds`] if ids are not strictly increasing.
    pub fn new(events: Vec<HistoryEvent>) -> Result<Self, EventError> {
        for pair in events.windows(2) {
            if pair[1].event_id <= pair[0].event_id {
                return Err(EventError::NonMonotonicIds {
                    previous: pair[0].event_id,
                    next: pair[1].event_id,
                });
            }
        }
        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Id of the newest record, 0 for an empty history
    pub fn last_event_id(&self) -> i64 {
        self.events.last().map(|e| e.event_id).unwrap_or(0)
    }

    /// All events, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = WorkflowEvent<'_>> + '_ {
        self.events.iter().map(move |record| WorkflowEvent::new(self, record))
    }

    /// Look up an event by id
    pub fn get(&self, event_id: i64) -> Option<WorkflowEvent<'_>> {
        self.events
            .binary_search_by_key(&event_id, |e| e.event_id)
            .ok()
            .map(|index| WorkflowEvent::new(self, &self.events[index]))
    }

    /// Look up an event by id, failing with [`EventError::UnknownEventId`]
    pub fn require(&self, event_id: i64) -> Result<WorkflowEvent<'_>, EventError> {
        self.get(event_id).ok_or(EventError::UnknownEventId(event_id))
    }

    /// Events with id strictly greater than `cursor`, oldest first
    pub fn events_after(&self, cursor: i64) -> impl Iterator<Item = WorkflowEvent<'_>> + '_ {
        let start = self.events.partition_point(|e| e.event_id <= cursor);
        self.events[start..]
            .iter()
            .map(move |record| WorkflowEvent::new(self, record))
    }

    /// Whether any record of the given kind exists
    pub fn contains(&self, event_type: EventType) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }

    /// Most recent `MarkerRecorded` event with this name
    pub fn latest_marker(&self, name: &str) -> Option<WorkflowEvent<'_>> {
        self.iter().rev().find(|event| {
            event.event_type() == EventType::MarkerRecorded
                && event.attributes().marker_name.as_deref() == Some(name)
        })
    }

    /// Details of the most recent marker with this name
    ///
    /// An absent marker and a marker with empty details are both `None`.
    pub fn marker_details(&self, name: &str) -> Option<&str> {
        self.latest_marker(name)
            .and_then(|event| event.attributes().details.as_deref())
            .filter(|details| !details.is_empty())
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.latest_marker(name).is_some()
    }

    /// The raw records, oldest first
    pub fn records(&self) -> &[HistoryEvent] {
        &self.events
    }
}

/// Appends well-formed records with consecutive ids
///
/// Used by tests and by the in-memory service to script executions.
#[derive(Debug, Clone, Default)]
pub struct HistoryBuilder {
    events: Vec<HistoryEvent>,
}

impl HistoryBuilder {
    /// Empty builder; the first pushed record gets id 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose first record is `WorkflowExecutionStarted`
    pub fn started(workflow_type: WorkflowType, input: &str) -> Self {
        let mut builder = Self::new();
        builder.push(
            EventType::WorkflowExecutionStarted,
            EventAttributes {
                workflow_type: Some(workflow_type),
                input: Some(input.to_string()),
                task_list: Some("default".to_string()),
                child_policy: Some("TERMINATE".to_string()),
                ..Default::default()
            },
        );
        builder
    }

    /// Append a record and return its id
    pub fn push(&mut self, event_type: EventType, attributes: EventAttributes) -> i64 {
        let id = self.next_id();
        self.events.push(HistoryEvent::new(id, event_type, attributes));
        id
    }

    pub fn next_id(&self) -> i64 {
        self.events.len() as i64 + 1
    }

    pub fn last_id(&self) -> i64 {
        self.events.len() as i64
    }

    /// Scheduled + started; returns the started id (the cursor of the task that sees it)
    pub fn decision_task_started(&mut self) -> i64 {
        let scheduled = self.push(
            EventType::DecisionTaskScheduled,
            EventAttributes {
                task_list: Some("default".to_string()),
                ..Default::default()
            },
        );
        self.push(
            EventType::DecisionTaskStarted,
            EventAttributes {
                scheduled_event_id: Some(scheduled),
                ..Default::default()
            },
        )
    }

    /// Completes the decision task whose started event is `started`
    pub fn decision_task_completed(&mut self, started: i64) -> i64 {
        self.push(
            EventType::DecisionTaskCompleted,
            EventAttributes {
                scheduled_event_id: Some(started - 1),
                started_event_id: Some(started),
                ..Default::default()
            },
        )
    }

    pub fn activity_scheduled(
        &mut self,
        activity_type: &ActivityType,
        activity_id: &str,
        input: &str,
        control: Option<&str>,
    ) -> i64 {
        self.push(
            EventType::ActivityTaskScheduled,
            EventAttributes {
                activity_type: Some(activity_type.clone()),
                activity_id: Some(activity_id.to_string()),
                input: Some(input.to_string()),
                control: control.map(str::to_string),
                task_list: Some("default".to_string()),
                schedule_to_start_timeout: Some("60".to_string()),
                schedule_to_close_timeout: Some("360".to_string()),
                start_to_close_timeout: Some("300".to_string()),
                heartbeat_timeout: Some("NONE".to_string()),
                ..Default::default()
            },
        )
    }

    pub fn activity_started(&mut self, scheduled: i64) -> i64 {
        self.push(
            EventType::ActivityTaskStarted,
            EventAttributes {
                scheduled_event_id: Some(scheduled),
                ..Default::default()
            },
        )
    }

    pub fn activity_completed(&mut self, scheduled: i64, started: i64, result: &str) -> i64 {
        self.push(
            EventType::ActivityTaskCompleted,
            EventAttributes {
                scheduled_event_id: Some(scheduled),
                started_event_id: Some(started),
                result: Some(result.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn activity_failed(
        &mut self,
        scheduled: i64,
        started: i64,
        reason: &str,
        details: &str,
    ) -> i64 {
        self.push(
            EventType::ActivityTaskFailed,
            EventAttributes {
                scheduled_event_id: Some(scheduled),
                started_event_id: Some(started),
                reason: Some(reason.to_string()),
                details: Some(details.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn activity_timed_out(&mut self, scheduled: i64, started: i64, timeout_type: &str) -> i64 {
        self.push(
            EventType::ActivityTaskTimedOut,
            EventAttributes {
                scheduled_event_id: Some(scheduled),
                started_event_id: Some(started),
                timeout_type: Some(timeout_type.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn timer_started(&mut self, timer_id: &str, seconds: u64, control: Option<&str>) -> i64 {
        self.push(
            EventType::TimerStarted,
            EventAttributes {
                timer_id: Some(timer_id.to_string()),
                start_to_fire_timeout: Some(seconds.to_string()),
                control: control.map(str::to_string),
                ..Default::default()
            },
        )
    }

    pub fn timer_fired(&mut self, timer_id: &str, started: i64) -> i64 {
        self.push(
            EventType::TimerFired,
            EventAttributes {
                timer_id: Some(timer_id.to_string()),
                started_event_id: Some(started),
                ..Default::default()
            },
        )
    }

    pub fn marker_recorded(&mut self, name: &str, details: &str) -> i64 {
        self.push(
            EventType::MarkerRecorded,
            EventAttributes {
                marker_name: Some(name.to_string()),
                details: Some(details.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn signaled(&mut self, signal_name: &str, input: &str) -> i64 {
        self.push(
            EventType::WorkflowExecutionSignaled,
            EventAttributes {
                signal_name: Some(signal_name.to_string()),
                input: Some(input.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn cancel_requested(&mut self) -> i64 {
        self.push(
            EventType::WorkflowExecutionCancelRequested,
            EventAttributes::default(),
        )
    }

    /// A close-decision rejection (`CompleteWorkflowExecutionFailed` etc.)
    pub fn close_rejected(&mut self, event_type: EventType, cause: &str) -> i64 {
        let completed = self.last_id();
        self.push(
            event_type,
            EventAttributes {
                cause: Some(cause.to_string()),
                decision_task_completed_event_id: Some(completed),
                ..Default::default()
            },
        )
    }

    pub fn child_initiated(
        &mut self,
        workflow_type: &WorkflowType,
        workflow_id: &str,
        input: &str,
    ) -> i64 {
        self.push(
            EventType::StartChildWorkflowExecutionInitiated,
            EventAttributes {
                workflow_type: Some(workflow_type.clone()),
                workflow_id: Some(workflow_id.to_string()),
                input: Some(input.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn child_completed(&mut self, initiated: i64, run_id: &str, result: &str) -> i64 {
        let workflow_id = self
            .events
            .iter()
            .find(|e| e.event_id == initiated)
            .and_then(|e| e.attributes.workflow_id.clone())
            .unwrap_or_default();
        self.push(
            EventType::ChildWorkflowExecutionCompleted,
            EventAttributes {
                initiated_event_id: Some(initiated),
                workflow_execution: Some(WorkflowExecution::new(workflow_id, run_id)),
                result: Some(result.to_string()),
                ..Default::default()
            },
        )
    }

    /// The records built so far
    pub fn records(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn into_records(self) -> Vec<HistoryEvent> {
        self.events
    }

    pub fn build(self) -> WorkflowHistory {
        WorkflowHistory {
            events: self.events,
        }
    }
}
