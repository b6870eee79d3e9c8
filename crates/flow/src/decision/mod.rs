//! Decisions
//!
//! - [`Decision`] one command returned to the service
//! - [`Decisions`] ordered, append-only buffer built by handlers
//! - [`DecisionExecutor`] close-decision ordering and submission

mod builder;
mod executor;
mod model;
mod options;

pub use builder::{DecisionError, Decisions};
pub use executor::{apply_close_ordering, DecisionExecutor, Submission};
pub use model::{
    ContinueAsNewWorkflowExecutionAttributes, Decision, ScheduleActivityTaskAttributes,
    StartChildWorkflowExecutionAttributes,
};
pub use options::{ActivityOptions, ExecutionOptions};
