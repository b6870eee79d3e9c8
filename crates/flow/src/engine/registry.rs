//! Event handler registry
//!
//! Handlers are registered at configuration time under an
//! [`EventHandlerType`] (event kind + contextual name). The registry is
//! immutable once built and may be shared across pollers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::EventContext;
use crate::codec::CodecError;
use crate::decision::{DecisionError, Decisions};
use crate::history::{ActivityType, EventCategory, EventError, EventType, WorkflowType};
use crate::reliability::RETRY_TIMER_PREFIX;

/// Cause reported when a close decision raced with new events
pub const UNHANDLED_DECISION_CAUSE: &str = "UNHANDLED_DECISION";

/// Dispatch key: event kind plus contextual name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventHandlerType {
    pub event_type: EventType,
    pub name: String,
}

impl EventHandlerType {
    pub fn new(event_type: EventType, name: impl Into<String>) -> Self {
        Self {
            event_type,
            name: name.into(),
        }
    }

    /// Key of the event a context is narrowed to
    pub fn of(ctx: &EventContext<'_>) -> Self {
        Self::new(ctx.event_type(), ctx.name())
    }

    /// Check the key is one an event could ever produce
    fn validate(&self) -> Result<(), RegistryError> {
        let malformed = |reason: &str| RegistryError::MalformedIdentity {
            key: self.clone(),
            reason: reason.to_string(),
        };

        let category = EventCategory::of(self.event_type)
            .ok_or_else(|| malformed("event kind is not supported"))?;

        match category {
            EventCategory::Decision if !self.name.is_empty() => {
                Err(malformed("decision events have no contextual name"))
            }
            EventCategory::Decision => Ok(()),
            // cancel failures for an activity id that was never scheduled
            _ if self.name.is_empty()
                && self.event_type == EventType::RequestCancelActivityTaskFailed =>
            {
                Ok(())
            }
            _ if self.name.is_empty() => Err(malformed("contextual name is empty")),
            EventCategory::Activity
            | EventCategory::WorkflowExecution
            | EventCategory::ChildWorkflow
                if !self.name.contains(':') =>
            {
                Err(malformed("expected a `name:version` type identity"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for EventHandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.event_type, self.name)
    }
}

/// What a handler did with its event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler appended decisions (or deliberately none)
    Acted,

    /// The handler chose not to act on this event
    Declined,
}

/// Errors raised by event handlers
///
/// Any handler error aborts the decision task pass.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("decision error: {0}")]
    Decision(#[from] DecisionError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failure raised by user code
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// A registered event handler
pub type EventHandler = Arc<
    dyn Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
        + Send
        + Sync,
>;

/// Errors from handler registration
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two handlers for the same key would make dispatch ambiguous
    #[error("a handler is already registered for {0}")]
    DuplicateHandler(EventHandlerType),

    /// The key can never match an event
    #[error("malformed handler identity {key}: {reason}")]
    MalformedIdentity {
        key: EventHandlerType,
        reason: String,
    },
}

/// Built-in behaviour for events without a user handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultHandler {
    /// A close decision was rejected because new events arrived; those
    /// events are dispatched in the same pass, so nothing to do
    IgnoreUnhandledDecision,

    /// A close decision was rejected for another cause; fail the workflow
    FailWorkflow,

    /// Activity failed or timed out; retry under the global policy
    ActivityRetry,

    /// A retry timer fired; schedule the activity again
    RetryTimer,
}

impl DefaultHandler {
    /// The default for `key`, if any
    ///
    /// Failures only default to a retry under a global policy; a fired retry
    /// timer is always rescheduled, whoever started it.
    pub fn for_event(
        key: &EventHandlerType,
        cause: Option<&str>,
        retry_enabled: bool,
    ) -> Option<Self> {
        use EventType::*;

        match key.event_type {
            kind if kind.is_close_rejection() && cause == Some(UNHANDLED_DECISION_CAUSE) => {
                Some(Self::IgnoreUnhandledDecision)
            }
            CompleteWorkflowExecutionFailed
            | CancelWorkflowExecutionFailed
            | ContinueAsNewWorkflowExecutionFailed => Some(Self::FailWorkflow),
            ActivityTaskFailed | ActivityTaskTimedOut if retry_enabled => {
                Some(Self::ActivityRetry)
            }
            TimerFired if key.name.starts_with(RETRY_TIMER_PREFIX) => Some(Self::RetryTimer),
            _ => None,
        }
    }
}

/// Result of a registry lookup
pub enum Dispatch<'r> {
    User(&'r EventHandler),
    Default(DefaultHandler),

    /// No handler; the event is skipped
    Skip,
}

impl fmt::Debug for Dispatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(_) => f.write_str("User"),
            Self::Default(handler) => f.debug_tuple("Default").field(handler).finish(),
            Self::Skip => f.write_str("Skip"),
        }
    }
}

/// Dispatch table from [`EventHandlerType`] to handler
///
/// # Example
///
/// ```ignore
/// let registry = EventHandlerRegistry::builder()
///     .on_workflow_started(&order, |ctx, decisions| {
///         let input: Order = ctx.input()?.unwrap_or_default();
///         decisions.schedule_activity(&charge, &input, &ActivityOptions::default())?;
///         Ok(HandlerOutcome::Acted)
///     })?
///     .build();
/// ```
#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: HashMap<EventHandlerType, EventHandler>,
}

impl EventHandlerRegistry {
    pub fn builder() -> EventHandlerRegistryBuilder {
        EventHandlerRegistryBuilder::default()
    }

    pub fn get(&self, key: &EventHandlerType) -> Option<&EventHandler> {
        self.handlers.get(key)
    }

    pub fn contains(&self, key: &EventHandlerType) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EventHandlerType> {
        self.handlers.keys()
    }

    /// Resolve the handler for an event
    ///
    /// User handlers take precedence over defaults; without either the
    /// event is skipped.
    pub fn dispatch(
        &self,
        key: &EventHandlerType,
        cause: Option<&str>,
        retry_enabled: bool,
    ) -> Dispatch<'_> {
        if let Some(handler) = self.handlers.get(key) {
            return Dispatch::User(handler);
        }
        match DefaultHandler::for_event(key, cause, retry_enabled) {
            Some(default) => Dispatch::Default(default),
            None => Dispatch::Skip,
        }
    }
}

impl fmt::Debug for EventHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`EventHandlerRegistry`]
///
/// Every registration is validated immediately; duplicates and keys that no
/// event could produce are rejected.
#[derive(Default)]
pub struct EventHandlerRegistryBuilder {
    handlers: HashMap<EventHandlerType, EventHandler>,
}

impl EventHandlerRegistryBuilder {
    /// Register a handler for `(event_type, name)`
    pub fn on<F>(
        mut self,
        event_type: EventType,
        name: impl Into<String>,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let key = EventHandlerType::new(event_type, name);
        key.validate()?;
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::DuplicateHandler(key));
        }
        self.handlers.insert(key, Arc::new(handler));
        Ok(self)
    }

    pub fn on_workflow_started<F>(
        self,
        workflow_type: &WorkflowType,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(
            EventType::WorkflowExecutionStarted,
            workflow_type.to_string(),
            handler,
        )
    }

    pub fn on_cancel_requested<F>(
        self,
        workflow_type: &WorkflowType,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(
            EventType::WorkflowExecutionCancelRequested,
            workflow_type.to_string(),
            handler,
        )
    }

    pub fn on_activity_completed<F>(
        self,
        activity_type: &ActivityType,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(
            EventType::ActivityTaskCompleted,
            activity_type.to_string(),
            handler,
        )
    }

    pub fn on_activity_failed<F>(
        self,
        activity_type: &ActivityType,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(
            EventType::ActivityTaskFailed,
            activity_type.to_string(),
            handler,
        )
    }

    pub fn on_timer_fired<F>(self, timer_id: &str, handler: F) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(EventType::TimerFired, timer_id, handler)
    }

    pub fn on_signal<F>(self, signal_name: &str, handler: F) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(EventType::WorkflowExecutionSignaled, signal_name, handler)
    }

    pub fn on_child_completed<F>(
        self,
        child_type: &WorkflowType,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&EventContext<'_>, &mut Decisions) -> Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.on(
            EventType::ChildWorkflowExecutionCompleted,
            child_type.to_string(),
            handler,
        )
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn build(self) -> EventHandlerRegistry {
        EventHandlerRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &EventContext<'_>, _: &mut Decisions) -> Result<HandlerOutcome, HandlerError> {
        Ok(HandlerOutcome::Acted)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let order = WorkflowType::new("order", "1.0");
        let result = EventHandlerRegistry::builder()
            .on_workflow_started(&order, noop)
            .unwrap()
            .on(EventType::WorkflowExecutionStarted, "order:1.0", noop);

        let err = result.err().unwrap();
        assert!(matches!(err, RegistryError::DuplicateHandler(_)));
        assert_eq!(
            err.to_string(),
            "a handler is already registered for WorkflowExecutionStarted(order:1.0)"
        );
    }

    #[test]
    fn test_same_name_different_kind_allowed() {
        let charge = ActivityType::new("charge", "1");
        let registry = EventHandlerRegistry::builder()
            .on_activity_completed(&charge, noop)
            .unwrap()
            .on_activity_failed(&charge, noop)
            .unwrap()
            .build();

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_malformed_identities_rejected() {
        let empty = EventHandlerRegistry::builder().on(EventType::TimerFired, "", noop);
        assert!(matches!(
            empty.err(),
            Some(RegistryError::MalformedIdentity { .. })
        ));

        let unversioned =
            EventHandlerRegistry::builder().on(EventType::ActivityTaskCompleted, "charge", noop);
        assert!(matches!(
            unversioned.err(),
            Some(RegistryError::MalformedIdentity { .. })
        ));

        let unknown = EventHandlerRegistry::builder().on(EventType::Unknown, "x", noop);
        assert!(matches!(
            unknown.err(),
            Some(RegistryError::MalformedIdentity { .. })
        ));

        let decision =
            EventHandlerRegistry::builder().on(EventType::DecisionTaskTimedOut, "", noop);
        assert!(decision.is_ok());

        let unknown_cancel = EventHandlerRegistry::builder().on(
            EventType::RequestCancelActivityTaskFailed,
            "",
            noop,
        );
        assert!(unknown_cancel.is_ok());
    }

    #[test]
    fn test_dispatch_prefers_user_handler() {
        let key =
            EventHandlerType::new(EventType::CompleteWorkflowExecutionFailed, "order:1.0");
        let registry = EventHandlerRegistry::builder()
            .on(key.event_type, key.name.clone(), noop)
            .unwrap()
            .build();

        assert!(matches!(
            registry.dispatch(&key, Some("OPERATION_NOT_PERMITTED"), false),
            Dispatch::User(_)
        ));
    }

    #[test]
    fn test_close_rejected_defaults() {
        let registry = EventHandlerRegistry::default();
        let dispatch = |event_type, cause| {
            registry.dispatch(&EventHandlerType::new(event_type, "order:1.0"), cause, false)
        };

        assert!(matches!(
            dispatch(EventType::FailWorkflowExecutionFailed, Some(UNHANDLED_DECISION_CAUSE)),
            Dispatch::Default(DefaultHandler::IgnoreUnhandledDecision)
        ));
        assert!(matches!(
            dispatch(EventType::CompleteWorkflowExecutionFailed, Some("OPERATION_NOT_PERMITTED")),
            Dispatch::Default(DefaultHandler::FailWorkflow)
        ));
        assert!(matches!(
            dispatch(EventType::FailWorkflowExecutionFailed, Some("OPERATION_NOT_PERMITTED")),
            Dispatch::Skip
        ));
    }

    #[test]
    fn test_failure_default_needs_policy() {
        let registry = EventHandlerRegistry::default();
        let failed = EventHandlerType::new(EventType::ActivityTaskFailed, "charge:1");
        let plain_timer = EventHandlerType::new(EventType::TimerFired, "t-1");

        assert!(matches!(registry.dispatch(&failed, None, false), Dispatch::Skip));
        assert!(matches!(
            registry.dispatch(&failed, None, true),
            Dispatch::Default(DefaultHandler::ActivityRetry)
        ));
        assert!(matches!(registry.dispatch(&plain_timer, None, true), Dispatch::Skip));
    }

    #[test]
    fn test_retry_timer_default_without_policy() {
        let registry = EventHandlerRegistry::default();
        let retry_timer = EventHandlerType::new(EventType::TimerFired, "__retry_timer:5");

        for retry_enabled in [false, true] {
            assert!(matches!(
                registry.dispatch(&retry_timer, None, retry_enabled),
                Dispatch::Default(DefaultHandler::RetryTimer)
            ));
        }
    }
}
