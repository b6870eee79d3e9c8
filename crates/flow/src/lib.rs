//! # Flow Decider
//!
//! Client-side orchestration for a remote workflow-history service. The
//! service owns all durable state; this crate polls it for work, replays
//! each execution's history and answers with decisions.
//!
//! ## Features
//!
//! - **Typed history view**: opaque records become [`WorkflowEvent`]s with
//!   category, contextual name and initiating-event resolution
//! - **Handler dispatch**: user handlers keyed by `(event kind, name)`, with
//!   defaults for close-rejected events and activity retries
//! - **Close ordering**: no decision follows a workflow close, and only
//!   close-compatible decisions precede it
//! - **Replay-derived retries**: attempt counters live in history markers,
//!   so a crashed decider loses nothing
//! - **Long-poll workers**: sequential decision worker and a bounded
//!   activity worker pool with graceful drain
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DecisionWorker                          │
//! │  (long-polls decision tasks, one at a time)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowTemplate                         │
//! │  (replays history, dispatches new events to handlers)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DecisionExecutor                         │
//! │  (orders close decisions, responds to the service)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use everruns_flow::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let order = WorkflowType::new("order", "1");
//! let charge = ActivityType::new("charge", "1");
//!
//! let scheduled = charge.clone();
//! let registry = EventHandlerRegistry::builder()
//!     .on_workflow_started(&order, move |ctx, decisions| {
//!         let amount: Option<u64> = ctx.input()?;
//!         decisions.schedule_activity(&scheduled, &amount, &ActivityOptions::default())?;
//!         Ok(HandlerOutcome::Acted)
//!     })?
//!     .on_activity_completed(&charge, |ctx, decisions| {
//!         let receipt: Option<String> = ctx.output()?;
//!         decisions.complete_workflow(&receipt)?;
//!         Ok(HandlerOutcome::Acted)
//!     })?
//!     .build();
//!
//! let policy = ExponentialRetryPolicy::new(
//!     Duration::from_secs(5),
//!     Duration::from_secs(3600),
//!     None,
//! )?;
//! let template = WorkflowTemplate::new(
//!     TemplateConfig::new(registry).with_retry_policy(Arc::new(policy)),
//! );
//!
//! let service = Arc::new(InMemoryWorkflowService::new());
//! let worker = DecisionWorker::new(service, template, WorkerConfig::new("shop", "orders"));
//! # let _ = worker;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod decision;
pub mod engine;
pub mod history;
pub mod reliability;
pub mod service;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::codec::{DurationTransform, JsonSerializer, Serializer};
    pub use crate::decision::{ActivityOptions, DecisionError, Decisions, ExecutionOptions};
    pub use crate::engine::{
        EventContext, EventHandlerRegistry, HandlerError, HandlerOutcome, TemplateConfig,
        WorkflowTemplate,
    };
    pub use crate::history::{
        ActivityType, EventCategory, EventType, WorkflowEvent, WorkflowExecution,
        WorkflowHistory, WorkflowType,
    };
    pub use crate::reliability::{
        ConstantTimeRetryPolicy, ExponentialRetryPolicy, NoRetryPolicy, RetryPolicy,
    };
    pub use crate::service::{InMemoryWorkflowService, ServiceError, WorkflowService};
    pub use crate::worker::{
        ActivityFailure, ActivityWorker, ActivityWorkerConfig, DecisionWorker, WorkerConfig,
        WorkerError,
    };
}

// Re-export key types at crate root
pub use codec::{CodecError, IdentityTransform, JsonSerializer, ScaledTransform};
pub use decision::{Decision, DecisionExecutor, Decisions};
pub use engine::{
    DecisionTaskContext, DecisionTaskError, EventContext, EventHandlerRegistry, TemplateConfig,
    WorkflowTemplate,
};
pub use history::{EventError, EventType, WorkflowEvent, WorkflowHistory};
pub use reliability::{
    ConstantTimeRetryPolicy, ExponentialRetryPolicy, NoRetryPolicy, RetryHandlers, RetryPolicy,
    RetryPolicyError,
};
pub use service::{InMemoryWorkflowService, ServiceError, WorkflowService};
pub use telemetry::{init_tracing, TelemetryConfig};
pub use worker::{ActivityWorker, DecisionWorker, PollerError, WorkerError};
