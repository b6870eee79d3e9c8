//! Long-poll workers
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          DecisionWorker                            │
//! │                                                                    │
//! │   Poller ──► DecisionTaskContext ──► WorkflowTemplate ──► Executor │
//! │   (hard timeout,   (paged history,      (handler         (close    │
//! │    backoff)         loaded once)         dispatch)        ordering)│
//! └────────────────────────────────────────────────────────────────────┘
//!
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          ActivityWorker                            │
//! │                                                                    │
//! │   permit ──► Poller ──► spawn(handler) ──► completed / failed      │
//! │   (Semaphore, max_concurrency)                                     │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both loops stop on a `watch` shutdown signal. A poll that outlives the
//! long-poll window plus margin ends the loop with
//! [`PollerError::HardTimeout`]; every other error is logged and retried
//! after backoff.

mod activity;
mod decision;
mod poller;

pub use activity::{
    ActivityFailure, ActivityHandler, ActivityResult, ActivityWorker, ActivityWorkerConfig,
    ACTIVITY_PANICKED_REASON, UNKNOWN_ACTIVITY_TYPE_REASON,
};
pub use decision::DecisionWorker;
pub use poller::{Poller, PollerConfig, PollerError, WorkerConfig, WorkerError, WorkerStatus};
