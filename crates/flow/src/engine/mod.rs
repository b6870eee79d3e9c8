//! Decision engine
//!
//! - [`DecisionTaskContext`] / [`EventContext`] per-task and per-event views
//! - [`EventHandlerRegistry`] dispatch table with default handlers
//! - [`WorkflowTemplate`] one decision task pass

mod context;
mod registry;
mod template;

pub use context::{contextual_name, DecisionTaskContext, EventContext};
pub use registry::{
    DefaultHandler, Dispatch, EventHandler, EventHandlerRegistry, EventHandlerRegistryBuilder,
    EventHandlerType, HandlerError, HandlerOutcome, RegistryError, UNHANDLED_DECISION_CAUSE,
};
pub use template::{DecisionTaskError, TemplateConfig, WorkflowTemplate};
