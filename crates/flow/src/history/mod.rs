//! Event model
//!
//! This module turns the opaque, append-only log reported by the remote
//! service into a typed, queryable view:
//! - [`HistoryEvent`] raw records and their [`EventType`]
//! - [`WorkflowEvent`] borrowed view with initiating-event resolution
//! - [`WorkflowHistory`] ordered, id-indexed collection

mod event;
mod record;
mod workflow_history;

pub use event::{EventCategory, EventError, WorkflowEvent};
pub use record::{
    ActivityType, EventAttributes, EventType, HistoryEvent, WorkflowExecution, WorkflowType,
};
pub use workflow_history::{HistoryBuilder, WorkflowHistory};
