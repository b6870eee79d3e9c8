//! Decision executor: close-decision ordering and submission

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::builder::Decisions;
use super::model::Decision;
use crate::service::{ServiceError, WorkflowService};

/// Enforce the close-decision ordering rules
///
/// Without a close decision the list is returned unchanged. Otherwise only
/// the first close decision survives; it is preceded by the earlier decisions
/// that are compatible with close (in their original order) and followed by
/// nothing.
pub fn apply_close_ordering(decisions: Vec<Decision>) -> Vec<Decision> {
    let Some(close_index) = decisions.iter().position(Decision::is_close) else {
        return decisions;
    };

    let mut ordered = Vec::with_capacity(close_index + 1);
    let mut close = None;
    for (index, decision) in decisions.into_iter().enumerate() {
        if index < close_index {
            if decision.is_compatible_with_close() {
                ordered.push(decision);
            } else {
                debug!(
                    decision_type = decision.decision_type(),
                    "Dropping decision incompatible with close"
                );
            }
        } else if index == close_index {
            close = Some(decision);
        } else {
            debug!(
                decision_type = decision.decision_type(),
                "Dropping decision appended after close"
            );
        }
    }

    ordered.extend(close);
    ordered
}

/// Result of submitting a decision batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The service accepted the batch
    Accepted { decisions: usize },

    /// The task token was no longer valid; the batch was dropped
    StaleToken,
}

/// Submits the decisions of one task to the remote service
#[derive(Clone)]
pub struct DecisionExecutor {
    service: Arc<dyn WorkflowService>,
}

impl DecisionExecutor {
    /// Create a new executor for the given service
    pub fn new(service: Arc<dyn WorkflowService>) -> Self {
        Self { service }
    }

    /// Order and submit `decisions` for the task identified by `task_token`
    ///
    /// A stale or unknown token is logged and reported as
    /// [`Submission::StaleToken`]; every other service error is returned.
    #[instrument(skip(self, task_token, decisions), fields(count = decisions.len()))]
    pub async fn submit(
        &self,
        task_token: &str,
        decisions: Decisions,
    ) -> Result<Submission, ServiceError> {
        let (decisions, execution_context) = decisions.into_parts();
        let ordered = apply_close_ordering(decisions);
        let count = ordered.len();

        match self
            .service
            .respond_decision_task_completed(task_token, ordered, execution_context)
            .await
        {
            Ok(()) => {
                info!(decisions = count, "Decision task completed");
                Ok(Submission::Accepted { decisions: count })
            }
            Err(ServiceError::UnknownResource(message)) => {
                warn!(error = %message, "Decision task token no longer valid, dropping decisions");
                Ok(Submission::StaleToken)
            }
            Err(e) => Err(e),
        }
    }
}
