//! Decision task and per-event contexts

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::debug;

use super::template::DecisionTaskError;
use crate::codec::{from_payload, CodecError, Serializer};
use crate::history::{
    ActivityType, EventCategory, EventError, EventType, WorkflowEvent, WorkflowExecution,
    WorkflowHistory, WorkflowType,
};
use crate::service::{DecisionTaskPage, PollDecisionTaskRequest, ServiceError, WorkflowService};

// ============================================================================
// DecisionTaskContext
// ============================================================================

/// One polled decision task
///
/// The history is materialized lazily on first use, following continuation
/// tokens until the last page, and then reused for the rest of the task.
pub struct DecisionTaskContext {
    service: Arc<dyn WorkflowService>,
    request: PollDecisionTaskRequest,
    task_token: String,
    workflow_execution: WorkflowExecution,
    workflow_type: WorkflowType,
    previous_started_event_id: i64,
    started_event_id: i64,
    first_page: DecisionTaskPage,
    history: OnceCell<WorkflowHistory>,
}

impl DecisionTaskContext {
    /// Create a context from the first page of a polled task
    ///
    /// `request` is the poll that produced the page; further pages are
    /// fetched with the same request and the page's continuation token.
    pub fn new(
        service: Arc<dyn WorkflowService>,
        request: PollDecisionTaskRequest,
        page: DecisionTaskPage,
    ) -> Self {
        Self {
            service,
            request,
            task_token: page.task_token.clone(),
            workflow_execution: page.workflow_execution.clone(),
            workflow_type: page.workflow_type.clone(),
            previous_started_event_id: page.previous_started_event_id,
            started_event_id: page.started_event_id,
            first_page: page,
            history: OnceCell::new(),
        }
    }

    pub fn task_token(&self) -> &str {
        &self.task_token
    }

    pub fn workflow_execution(&self) -> &WorkflowExecution {
        &self.workflow_execution
    }

    pub fn workflow_type(&self) -> &WorkflowType {
        &self.workflow_type
    }

    /// Cursor: id of the last event the previous decision task saw
    pub fn previous_started_event_id(&self) -> i64 {
        self.previous_started_event_id
    }

    pub fn started_event_id(&self) -> i64 {
        self.started_event_id
    }

    /// The full history of the execution
    pub async fn history(&self) -> Result<&WorkflowHistory, DecisionTaskError> {
        self.history.get_or_try_init(|| self.load_history()).await
    }

    /// Events with id greater than the cursor, oldest first
    pub async fn new_events(&self) -> Result<Vec<WorkflowEvent<'_>>, DecisionTaskError> {
        let history = self.history().await?;
        Ok(history.events_after(self.previous_started_event_id).collect())
    }

    pub async fn has_marker(&self, name: &str) -> Result<bool, DecisionTaskError> {
        Ok(self.history().await?.has_marker(name))
    }

    /// Details of the most recent marker with this name
    ///
    /// An absent marker or empty details yield `Ok(None)`.
    pub async fn marker_details<T: DeserializeOwned>(
        &self,
        name: &str,
        serializer: &dyn Serializer,
    ) -> Result<Option<T>, DecisionTaskError> {
        let history = self.history().await?;
        Ok(decode(serializer, history.marker_details(name))?)
    }

    async fn load_history(&self) -> Result<WorkflowHistory, DecisionTaskError> {
        let mut events = self.first_page.events.clone();
        let mut next_page_token = self.first_page.next_page_token.clone();
        let mut pages = 1;

        while let Some(token) = next_page_token {
            let request = self.request.with_page_token(token);
            let page = self
                .service
                .poll_for_decision_task(&request)
                .await?
                .ok_or_else(|| {
                    ServiceError::Internal("history page missing for continuation token".into())
                })?;

            events.extend(page.events);
            next_page_token = page.next_page_token;
            pages += 1;
        }

        debug!(
            workflow_id = %self.workflow_execution.workflow_id,
            events = events.len(),
            pages,
            "Loaded workflow history"
        );

        Ok(WorkflowHistory::new(events)?)
    }
}

impl std::fmt::Debug for DecisionTaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionTaskContext")
            .field("workflow_execution", &self.workflow_execution)
            .field("workflow_type", &self.workflow_type)
            .field("previous_started_event_id", &self.previous_started_event_id)
            .field("started_event_id", &self.started_event_id)
            .finish()
    }
}

// ============================================================================
// EventContext
// ============================================================================

/// A decision task narrowed to one current event
///
/// Carries the event's category and contextual name (the dispatch identity)
/// together with category-checked accessors for the fields a handler of
/// that category receives.
#[derive(Clone, Copy)]
pub struct EventContext<'a> {
    event: WorkflowEvent<'a>,
    category: EventCategory,
    name: &'a str,
    workflow_execution: &'a WorkflowExecution,
    workflow_type: &'a WorkflowType,
    serializer: &'a dyn Serializer,
}

/// Dispatch identity of an event, derived from its category and fields
///
/// # Errors
///
/// [`EventError::UnsupportedEventKind`] for unknown kinds and
/// [`EventError::MissingField`] when the identifying field cannot be
/// resolved. A cancel failure for an activity id with no earlier schedule
/// is named with the empty string.
pub fn contextual_name(
    event: &WorkflowEvent<'_>,
    workflow_type: &WorkflowType,
) -> Result<String, EventError> {
    let name = match event.category()? {
        EventCategory::Activity => match activity_type_of(event) {
            Some(activity_type) => activity_type.to_string(),
            // the service rejects cancels of ids it never scheduled
            None if event.event_type() == EventType::RequestCancelActivityTaskFailed => {
                String::new()
            }
            None => return Err(missing(event, "activity_type")),
        },
        EventCategory::WorkflowExecution => workflow_type.to_string(),
        EventCategory::ChildWorkflow => event
            .require(event.workflow_type(), "workflow_type")?
            .to_string(),
        EventCategory::Signal | EventCategory::ExternalWorkflowSignal => {
            event.require(event.signal_name(), "signal_name")?.to_string()
        }
        EventCategory::Timer => event.require(event.timer_id(), "timer_id")?.to_string(),
        EventCategory::Marker => event.require(event.marker_name(), "marker_name")?.to_string(),
        EventCategory::ExternalWorkflowCancel => {
            event.require(event.workflow_id(), "workflow_id")?.to_string()
        }
        EventCategory::Lambda => event.require(event.lambda_name(), "lambda_name")?.to_string(),
        EventCategory::Decision => String::new(),
    };
    Ok(name)
}

/// Activity type of an activity event
///
/// Cancel-request records carry only the activity id; their type is taken
/// from the latest earlier schedule of that id.
fn activity_type_of<'h>(event: &WorkflowEvent<'h>) -> Option<&'h ActivityType> {
    event.activity_type().or_else(|| {
        let activity_id = event.activity_id()?;
        event
            .history()
            .iter()
            .rev()
            .filter(|e| e.id() < event.id())
            .find(|e| {
                e.event_type() == EventType::ActivityTaskScheduled
                    && e.activity_id() == Some(activity_id)
            })
            .and_then(|e| e.activity_type())
    })
}

fn missing(event: &WorkflowEvent<'_>, field: &'static str) -> EventError {
    EventError::MissingField {
        event_id: event.id(),
        event_type: event.event_type(),
        field,
    }
}

fn decode<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    payload: Option<&str>,
) -> Result<Option<T>, CodecError> {
    payload
        .map(|payload| from_payload(serializer, payload))
        .transpose()
}

impl<'a> EventContext<'a> {
    /// Narrow a task to `event`
    ///
    /// `name` must be the event's [`contextual_name`].
    pub fn new(
        event: WorkflowEvent<'a>,
        name: &'a str,
        workflow_execution: &'a WorkflowExecution,
        workflow_type: &'a WorkflowType,
        serializer: &'a dyn Serializer,
    ) -> Result<Self, EventError> {
        Ok(Self {
            category: event.category()?,
            event,
            name,
            workflow_execution,
            workflow_type,
            serializer,
        })
    }

    pub fn event(&self) -> &WorkflowEvent<'a> {
        &self.event
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// Contextual name used for dispatch
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn history(&self) -> &'a WorkflowHistory {
        self.event.history()
    }

    /// The execution this decision task belongs to
    pub fn workflow_execution(&self) -> &'a WorkflowExecution {
        self.workflow_execution
    }

    /// Type of the execution this decision task belongs to
    pub fn workflow_type(&self) -> &'a WorkflowType {
        self.workflow_type
    }

    pub fn serializer(&self) -> &'a dyn Serializer {
        self.serializer
    }

    /// Fail unless the current event belongs to `expected`
    pub fn expect_category(&self, expected: EventCategory) -> Result<(), EventError> {
        if self.category == expected {
            Ok(())
        } else {
            Err(EventError::WrongCategory {
                event_id: self.event.id(),
                expected,
                actual: self.category,
            })
        }
    }

    // ========================================================================
    // Payloads
    // ========================================================================

    /// Deserialize the event's input (resolved through its initiator)
    pub fn input<T: DeserializeOwned>(&self) -> Result<Option<T>, CodecError> {
        decode(self.serializer, self.event.input())
    }

    /// Deserialize the event's result
    pub fn output<T: DeserializeOwned>(&self) -> Result<Option<T>, CodecError> {
        decode(self.serializer, self.event.output())
    }

    pub fn control<T: DeserializeOwned>(&self) -> Result<Option<T>, CodecError> {
        decode(self.serializer, self.event.control())
    }

    pub fn details<T: DeserializeOwned>(&self) -> Result<Option<T>, CodecError> {
        decode(self.serializer, self.event.details())
    }

    pub fn reason(&self) -> Option<&'a str> {
        self.event.reason()
    }

    pub fn cause(&self) -> Option<&'a str> {
        self.event.cause()
    }

    // ========================================================================
    // Category-checked accessors
    // ========================================================================

    pub fn activity_type(&self) -> Result<&'a ActivityType, EventError> {
        self.expect_category(EventCategory::Activity)?;
        activity_type_of(&self.event).ok_or_else(|| missing(&self.event, "activity_type"))
    }

    pub fn activity_id(&self) -> Result<&'a str, EventError> {
        self.expect_category(EventCategory::Activity)?;
        self.event.require(self.event.activity_id(), "activity_id")
    }

    /// Id of the `ActivityTaskScheduled` record behind this activity event
    pub fn scheduled_event_id(&self) -> Result<i64, EventError> {
        self.expect_category(EventCategory::Activity)?;
        Ok(self.event.initiating_event_id())
    }

    pub fn signal_name(&self) -> Result<&'a str, EventError> {
        if self.category != EventCategory::ExternalWorkflowSignal {
            self.expect_category(EventCategory::Signal)?;
        }
        self.event.require(self.event.signal_name(), "signal_name")
    }

    pub fn timer_id(&self) -> Result<&'a str, EventError> {
        self.expect_category(EventCategory::Timer)?;
        self.event.require(self.event.timer_id(), "timer_id")
    }

    pub fn marker_name(&self) -> Result<&'a str, EventError> {
        self.expect_category(EventCategory::Marker)?;
        self.event.require(self.event.marker_name(), "marker_name")
    }

    /// Type of the child workflow this event refers to
    pub fn child_workflow_type(&self) -> Result<&'a WorkflowType, EventError> {
        self.expect_category(EventCategory::ChildWorkflow)?;
        self.event.require(self.event.workflow_type(), "workflow_type")
    }

    /// Workflow id of the child or external execution this event refers to
    pub fn target_workflow_id(&self) -> Result<&'a str, EventError> {
        match self.category {
            EventCategory::ChildWorkflow
            | EventCategory::ExternalWorkflowSignal
            | EventCategory::ExternalWorkflowCancel => {
                self.event.require(self.event.workflow_id(), "workflow_id")
            }
            actual => Err(EventError::WrongCategory {
                event_id: self.event.id(),
                expected: EventCategory::ChildWorkflow,
                actual,
            }),
        }
    }

    /// Run id of the child or external execution, once known
    pub fn target_run_id(&self) -> Option<&'a str> {
        self.event.run_id()
    }

    pub fn lambda_name(&self) -> Result<&'a str, EventError> {
        self.expect_category(EventCategory::Lambda)?;
        self.event.require(self.event.lambda_name(), "lambda_name")
    }

    pub fn lambda_id(&self) -> Result<&'a str, EventError> {
        self.expect_category(EventCategory::Lambda)?;
        self.event.require(self.event.lambda_id(), "lambda_id")
    }

    /// Run id that replaced this execution, on `WorkflowExecutionContinuedAsNew`
    pub fn new_execution_run_id(&self) -> Result<&'a str, EventError> {
        self.expect_category(EventCategory::WorkflowExecution)?;
        self.event
            .require(self.event.new_execution_run_id(), "new_execution_run_id")
    }

    // ========================================================================
    // Markers
    // ========================================================================

    pub fn has_marker(&self, name: &str) -> bool {
        self.history().has_marker(name)
    }

    /// Details of the most recent marker with this name
    pub fn marker_details<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, CodecError> {
        decode(self.serializer, self.history().marker_details(name))
    }
}

impl std::fmt::Debug for EventContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .field("category", &self.category)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonSerializer;
    use crate::history::{EventAttributes, HistoryBuilder};
    use crate::service::{InMemoryWorkflowService, ScriptedDecisionTask};

    fn wf() -> WorkflowType {
        WorkflowType::new("order", "1.0")
    }

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new("order-1", "run-1")
    }

    #[test]
    fn test_contextual_names_by_category() {
        let activity = ActivityType::new("charge", "2");
        let child = WorkflowType::new("ship", "1");
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        let decision = builder.decision_task_started();
        let scheduled = builder.activity_scheduled(&activity, "a-1", "{}", None);
        let timer = builder.timer_started("t-7", 5, None);
        let marker = builder.marker_recorded("checkpoint", "1");
        let signal = builder.signaled("approve", "true");
        let child_init = builder.child_initiated(&child, "ship-1", "{}");
        let history = builder.build();

        let name = |id| contextual_name(&history.get(id).unwrap(), &wf()).unwrap();
        assert_eq!(name(1), "order:1.0");
        assert_eq!(name(decision), "");
        assert_eq!(name(scheduled), "charge:2");
        assert_eq!(name(timer), "t-7");
        assert_eq!(name(marker), "checkpoint");
        assert_eq!(name(signal), "approve");
        assert_eq!(name(child_init), "ship:1");
    }

    #[test]
    fn test_cancel_requested_activity_name_from_schedule() {
        let activity = ActivityType::new("charge", "2");
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        builder.activity_scheduled(&activity, "a-1", "{}", None);
        let cancel = builder.push(
            EventType::ActivityTaskCancelRequested,
            EventAttributes {
                activity_id: Some("a-1".to_string()),
                ..Default::default()
            },
        );
        let history = builder.build();

        assert_eq!(
            contextual_name(&history.get(cancel).unwrap(), &wf()).unwrap(),
            "charge:2"
        );
    }

    #[test]
    fn test_unknown_activity_cancel_failure_has_empty_name() {
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        let failed = builder.push(
            EventType::RequestCancelActivityTaskFailed,
            EventAttributes {
                activity_id: Some("never-scheduled".to_string()),
                cause: Some("ACTIVITY_ID_UNKNOWN".to_string()),
                ..Default::default()
            },
        );
        let history = builder.build();

        assert_eq!(
            contextual_name(&history.get(failed).unwrap(), &wf()).unwrap(),
            ""
        );
    }

    #[test]
    fn test_lambda_accessors() {
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        let scheduled = builder.push(
            EventType::LambdaFunctionScheduled,
            EventAttributes {
                lambda_id: Some("l-1".to_string()),
                lambda_name: Some("thumbnail".to_string()),
                ..Default::default()
            },
        );
        let completed = builder.push(
            EventType::LambdaFunctionCompleted,
            EventAttributes {
                scheduled_event_id: Some(scheduled),
                result: Some("\"ok\"".to_string()),
                ..Default::default()
            },
        );
        let history = builder.build();
        let execution = execution();
        let workflow_type = wf();
        let event = history.get(completed).unwrap();
        let name = contextual_name(&event, &workflow_type).unwrap();

        let ctx =
            EventContext::new(event, &name, &execution, &workflow_type, &JsonSerializer).unwrap();

        assert_eq!(ctx.name(), "thumbnail");
        assert_eq!(ctx.lambda_name().unwrap(), "thumbnail");
        assert_eq!(ctx.lambda_id().unwrap(), "l-1");
        assert_eq!(ctx.output::<String>().unwrap().as_deref(), Some("ok"));
        assert!(matches!(
            ctx.new_execution_run_id(),
            Err(EventError::WrongCategory { .. })
        ));
    }

    #[test]
    fn test_missing_identity_is_an_error() {
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        let fired = builder.push(EventType::TimerFired, EventAttributes::default());
        let history = builder.build();

        let err = contextual_name(&history.get(fired).unwrap(), &wf()).unwrap_err();
        assert!(matches!(
            err,
            EventError::MissingField {
                field: "timer_id",
                ..
            }
        ));
    }

    #[test]
    fn test_category_checked_accessors() {
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        let signal = builder.signaled("approve", "true");
        let history = builder.build();
        let event = history.get(signal).unwrap();
        let execution = execution();
        let workflow_type = wf();

        let ctx = EventContext::new(event, "approve", &execution, &workflow_type, &JsonSerializer)
            .unwrap();

        assert_eq!(ctx.signal_name().unwrap(), "approve");
        assert_eq!(ctx.input::<bool>().unwrap(), Some(true));
        assert!(matches!(
            ctx.timer_id(),
            Err(EventError::WrongCategory {
                expected: EventCategory::Timer,
                actual: EventCategory::Signal,
                ..
            })
        ));
    }

    #[test]
    fn test_event_context_marker_helpers() {
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        builder.marker_recorded("count", "3");
        let history = builder.build();
        let execution = execution();
        let workflow_type = wf();

        let ctx = EventContext::new(
            history.get(1).unwrap(),
            "order:1.0",
            &execution,
            &workflow_type,
            &JsonSerializer,
        )
        .unwrap();

        assert!(ctx.has_marker("count"));
        assert_eq!(ctx.marker_details::<u32>("count").unwrap(), Some(3));
        assert_eq!(ctx.marker_details::<u32>("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_history_follows_pages_once() {
        let mut builder = HistoryBuilder::started(wf(), "\"in\"");
        builder.decision_task_started();
        builder.marker_recorded("step", "\"two\"");
        let started = builder.decision_task_started();
        let service = Arc::new(InMemoryWorkflowService::new().with_page_size(2));
        service.enqueue_decision_task(
            ScriptedDecisionTask::new(execution(), wf(), builder.into_records())
                .with_previous_started_event_id(3),
        );

        let request = PollDecisionTaskRequest::new("test", "default", "tester");
        let page = service.poll_for_decision_task(&request).await.unwrap().unwrap();
        let task = DecisionTaskContext::new(service.clone(), request, page);

        assert_eq!(task.started_event_id(), started);
        assert_eq!(task.history().await.unwrap().len(), 6);
        let polls = service.decision_poll_count();
        assert_eq!(task.history().await.unwrap().len(), 6);
        assert_eq!(service.decision_poll_count(), polls);

        let new_ids: Vec<_> = task.new_events().await.unwrap().iter().map(|e| e.id()).collect();
        assert_eq!(new_ids, vec![4, 5, 6]);

        assert!(task.has_marker("step").await.unwrap());
        let details: Option<String> = task.marker_details("step", &JsonSerializer).await.unwrap();
        assert_eq!(details.as_deref(), Some("two"));
    }
}
