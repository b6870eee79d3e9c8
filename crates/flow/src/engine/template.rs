//! Workflow template: one decision task processing pass

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::context::{contextual_name, DecisionTaskContext, EventContext};
use super::registry::{
    DefaultHandler, Dispatch, EventHandlerRegistry, EventHandlerType, HandlerError, HandlerOutcome,
};
use crate::codec::{
    CodecError, DurationTransform, IdentityTransform, JsonSerializer, Serializer,
};
use crate::decision::Decisions;
use crate::history::{EventError, WorkflowExecution, WorkflowHistory, WorkflowType};
use crate::reliability::{RetryHandlers, RetryPolicy};
use crate::service::ServiceError;

/// Errors that abort a decision task pass
///
/// None of these are retried locally; the service redelivers the task.
#[derive(Debug, thiserror::Error)]
pub enum DecisionTaskError {
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A handler failed while processing an event
    #[error("handler for {key} failed on event {event_id}: {source}")]
    Handler {
        key: EventHandlerType,
        event_id: i64,
        #[source]
        source: HandlerError,
    },
}

/// Collaborators of a [`WorkflowTemplate`]
#[derive(Clone)]
pub struct TemplateConfig {
    pub registry: Arc<EventHandlerRegistry>,
    pub serializer: Arc<dyn Serializer>,
    pub duration_transform: Arc<dyn DurationTransform>,

    /// Global retry policy; enables the default retry of failed activities
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl TemplateConfig {
    /// JSON payloads, untransformed durations, no global retry policy
    pub fn new(registry: EventHandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            serializer: Arc::new(JsonSerializer),
            duration_transform: Arc::new(IdentityTransform),
            retry_policy: None,
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_duration_transform(mut self, transform: Arc<dyn DurationTransform>) -> Self {
        self.duration_transform = transform;
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

impl std::fmt::Debug for TemplateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateConfig")
            .field("registry", &self.registry)
            .field("retry_policy", &self.retry_policy.is_some())
            .finish()
    }
}

/// Turns the new events of a decision task into decisions
///
/// Events are dispatched oldest-first, one handler at a time, into a single
/// [`Decisions`] buffer. The first handler error aborts the pass and no
/// decisions are returned.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    config: TemplateConfig,
    retry: Option<RetryHandlers>,
}

impl WorkflowTemplate {
    pub fn new(config: TemplateConfig) -> Self {
        let retry = config.retry_policy.clone().map(RetryHandlers::new);
        Self { config, retry }
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// An empty buffer wired to this template's collaborators
    pub fn new_decisions(&self) -> Decisions {
        Decisions::new(
            self.config.serializer.clone(),
            self.config.duration_transform.clone(),
        )
    }

    /// Process one decision task
    #[instrument(
        skip(self, task),
        fields(
            workflow_id = %task.workflow_execution().workflow_id,
            run_id = %task.workflow_execution().run_id,
            workflow_type = %task.workflow_type(),
        )
    )]
    pub async fn process(
        &self,
        task: &DecisionTaskContext,
    ) -> Result<Decisions, DecisionTaskError> {
        let history = task.history().await?;
        self.decide(
            history,
            task.workflow_execution(),
            task.workflow_type(),
            task.previous_started_event_id(),
        )
    }

    /// Dispatch every event after `cursor` and collect the decisions
    pub fn decide(
        &self,
        history: &WorkflowHistory,
        workflow_execution: &WorkflowExecution,
        workflow_type: &WorkflowType,
        cursor: i64,
    ) -> Result<Decisions, DecisionTaskError> {
        let mut decisions = self.new_decisions();
        let serializer = self.config.serializer.as_ref();
        let mut dispatched = 0usize;

        for event in history.events_after(cursor) {
            let name = contextual_name(&event, workflow_type)?;
            let ctx =
                EventContext::new(event, &name, workflow_execution, workflow_type, serializer)?;
            let key = EventHandlerType::of(&ctx);

            let dispatch = self
                .config
                .registry
                .dispatch(&key, ctx.cause(), self.retry.is_some());

            let outcome = match dispatch {
                Dispatch::User(handler) => handler(&ctx, &mut decisions),
                Dispatch::Default(default) => self.run_default(default, &ctx, &mut decisions),
                Dispatch::Skip => continue,
            };

            match outcome {
                Ok(outcome) => {
                    dispatched += 1;
                    debug!(event_id = event.id(), handler = %key, ?outcome, "Dispatched event");
                }
                Err(source) => {
                    warn!(
                        event_id = event.id(),
                        handler = %key,
                        error = %source,
                        "Handler failed, abandoning decision task"
                    );
                    return Err(DecisionTaskError::Handler {
                        key,
                        event_id: event.id(),
                        source,
                    });
                }
            }
        }

        info!(
            dispatched,
            decisions = decisions.len(),
            "Decision task processed"
        );
        Ok(decisions)
    }

    fn run_default(
        &self,
        default: DefaultHandler,
        ctx: &EventContext<'_>,
        decisions: &mut Decisions,
    ) -> Result<HandlerOutcome, HandlerError> {
        match default {
            DefaultHandler::IgnoreUnhandledDecision => {
                debug!(
                    event_type = %ctx.event_type(),
                    "Close decision raced with new events, ignoring"
                );
                Ok(HandlerOutcome::Declined)
            }
            DefaultHandler::FailWorkflow => {
                let cause = ctx.cause().unwrap_or("UNKNOWN");
                warn!(
                    event_type = %ctx.event_type(),
                    cause,
                    "Close decision rejected, failing workflow"
                );
                decisions.fail_workflow(cause, None);
                Ok(HandlerOutcome::Acted)
            }
            DefaultHandler::ActivityRetry => match &self.retry {
                Some(retry) => retry.default_on_activity_failure(ctx, decisions),
                None => Ok(HandlerOutcome::Declined),
            },
            DefaultHandler::RetryTimer => RetryHandlers::on_retry_timer_fired(ctx, decisions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{ActivityOptions, Decision};
    use crate::history::{ActivityType, EventType, HistoryBuilder};
    use crate::reliability::ConstantTimeRetryPolicy;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn wf() -> WorkflowType {
        WorkflowType::new("order", "1")
    }

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new("order-1", "run-1")
    }

    fn record_signal(
        seen: Arc<Mutex<Vec<String>>>,
    ) -> impl Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
           + Send
           + Sync
           + 'static {
        move |ctx, _| {
            seen.lock().push(ctx.signal_name()?.to_string());
            Ok(HandlerOutcome::Acted)
        }
    }

    #[test]
    fn test_only_new_events_dispatched_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = EventHandlerRegistry::builder()
            .on_signal("a", record_signal(seen.clone()))
            .unwrap()
            .on_signal("b", record_signal(seen.clone()))
            .unwrap()
            .build();

        let mut builder = HistoryBuilder::started(wf(), "{}");
        builder.signaled("a", "1");
        let cursor = builder.decision_task_started();
        builder.signaled("b", "2");
        builder.signaled("a", "3");
        builder.decision_task_started();
        let history = builder.build();

        let template = WorkflowTemplate::new(TemplateConfig::new(registry));
        template.decide(&history, &execution(), &wf(), cursor).unwrap();

        assert_eq!(*seen.lock(), vec!["b", "a"]);
    }

    #[test]
    fn test_handler_error_aborts_pass() {
        let calls = Arc::new(Mutex::new(0));
        let counted = calls.clone();
        let registry = EventHandlerRegistry::builder()
            .on_signal("boom", |_, _| Err(anyhow::anyhow!("exploded").into()))
            .unwrap()
            .on_signal("after", move |_, decisions| {
                *counted.lock() += 1;
                decisions.cancel_timer("t");
                Ok(HandlerOutcome::Acted)
            })
            .unwrap()
            .build();

        let mut builder = HistoryBuilder::started(wf(), "{}");
        builder.signaled("boom", "");
        builder.signaled("after", "");
        let history = builder.build();

        let template = WorkflowTemplate::new(TemplateConfig::new(registry));
        let err = template.decide(&history, &execution(), &wf(), 0).unwrap_err();

        assert!(matches!(err, DecisionTaskError::Handler { event_id: 2, .. }));
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn test_unsupported_event_kind_aborts_pass() {
        let mut builder = HistoryBuilder::started(wf(), "{}");
        builder.push(EventType::Unknown, Default::default());
        let history = builder.build();

        let template = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));
        let err = template.decide(&history, &execution(), &wf(), 0).unwrap_err();
        assert!(matches!(
            err,
            DecisionTaskError::Event(EventError::UnsupportedEventKind { event_id: 2, .. })
        ));
    }

    #[test]
    fn test_unhandled_events_are_skipped() {
        let mut builder = HistoryBuilder::started(wf(), "{}");
        builder.decision_task_started();
        builder.marker_recorded("m", "1");
        let history = builder.build();

        let template = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));
        let decisions = template.decide(&history, &execution(), &wf(), 0).unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_close_rejection_fails_workflow_by_default() {
        let mut builder = HistoryBuilder::started(wf(), "{}");
        let started = builder.decision_task_started();
        builder.decision_task_completed(started);
        builder.close_rejected(
            EventType::CompleteWorkflowExecutionFailed,
            "OPERATION_NOT_PERMITTED",
        );
        builder.close_rejected(EventType::CancelWorkflowExecutionFailed, "UNHANDLED_DECISION");
        let history = builder.build();

        let template = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));
        let decisions = template.decide(&history, &execution(), &wf(), started).unwrap();

        assert_eq!(
            decisions.into_inner(),
            vec![Decision::FailWorkflowExecution {
                reason: Some("OPERATION_NOT_PERMITTED".to_string()),
                details: None,
            }]
        );
    }

    #[test]
    fn test_default_retry_needs_global_policy() {
        let charge = ActivityType::new("charge", "1");
        let mut builder = HistoryBuilder::started(wf(), "{}");
        let cursor = builder.decision_task_started();
        let scheduled = builder.activity_scheduled(&charge, "a-1", "{}", None);
        let started = builder.activity_started(scheduled);
        builder.activity_failed(scheduled, started, "declined", "");
        let history = builder.build();

        let without = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));
        assert!(without
            .decide(&history, &execution(), &wf(), cursor)
            .unwrap()
            .is_empty());

        let policy = ConstantTimeRetryPolicy::new(Duration::from_secs(10), None).unwrap();
        let with = WorkflowTemplate::new(
            TemplateConfig::new(EventHandlerRegistry::default())
                .with_retry_policy(Arc::new(policy)),
        );
        let decisions = with.decide(&history, &execution(), &wf(), cursor).unwrap();
        assert_eq!(decisions.as_slice()[0].decision_type(), "StartTimer");
    }

    #[test]
    fn test_user_handler_builds_decisions() {
        let charge = ActivityType::new("charge", "1");
        let scheduled_type = charge.clone();
        let registry = EventHandlerRegistry::builder()
            .on_workflow_started(&wf(), move |ctx, decisions| {
                let amount: u32 = ctx.input()?.unwrap_or_default();
                decisions.schedule_activity(&scheduled_type, &amount, &ActivityOptions::default())?;
                Ok(HandlerOutcome::Acted)
            })
            .unwrap()
            .build();

        let history = HistoryBuilder::started(wf(), "42").build();
        let template = WorkflowTemplate::new(TemplateConfig::new(registry));
        let decisions = template.decide(&history, &execution(), &wf(), 0).unwrap();

        match &decisions.as_slice()[0] {
            Decision::ScheduleActivityTask(attrs) => {
                assert_eq!(attrs.activity_type, charge);
                assert_eq!(attrs.input.as_deref(), Some("42"));
            }
            other => panic!("Expected ScheduleActivityTask, got {:?}", other),
        }
    }
}
