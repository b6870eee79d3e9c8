//! Remote service boundary
//!
//! - [`WorkflowService`] the long-poll/respond protocol
//! - [`InMemoryWorkflowService`] scripted implementation for tests

mod client;
mod memory;

pub use client::{
    ActivityTask, DecisionTaskPage, PollActivityTaskRequest, PollDecisionTaskRequest,
    ServiceError, WorkflowService,
};
pub use memory::{ActivityOutcome, DecisionResponse, InMemoryWorkflowService, ScriptedDecisionTask};
