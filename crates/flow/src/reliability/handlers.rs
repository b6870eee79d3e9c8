//! Replay-derived activity retries
//!
//! Attempt counters live only in the execution's own history, as markers.
//! A failure starts a retry timer carrying a [`RetryControl`]; when the timer
//! fires the activity is scheduled again from its original record and the
//! attempt marker is advanced.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::retry::RetryPolicy;
use crate::decision::Decisions;
use crate::engine::{EventContext, HandlerError, HandlerOutcome};
use crate::history::{EventCategory, EventError, EventType};

/// Prefix of retry timer ids; the originating schedule id follows
pub const RETRY_TIMER_PREFIX: &str = "__retry_timer:";

/// Prefix of attempt marker names; the activity identity follows
pub const RETRY_ATTEMPT_MARKER_PREFIX: &str = "__retry_attempt:";

/// Control payload carried by a retry timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryControl {
    /// Id of the `ActivityTaskScheduled` record to schedule again
    pub schedule_event_id: i64,

    /// Activity identity (`name:version`)
    pub activity_name: String,
}

/// What a failure handler decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A retry timer was started
    Scheduled { attempt: u32, delay: Duration },

    /// The policy allows no further attempts; nothing was appended
    Exhausted { attempt: u32 },
}

/// Retry orchestration over a [`RetryPolicy`]
///
/// Usable directly from user handlers, and installed as the default for
/// activity failures when a global policy is configured. Retry timers are
/// always handled by [`RetryHandlers::on_retry_timer_fired`].
#[derive(Clone)]
pub struct RetryHandlers {
    policy: Arc<dyn RetryPolicy>,
}

impl RetryHandlers {
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }

    pub fn retry_timer_id(schedule_event_id: i64) -> String {
        format!("{RETRY_TIMER_PREFIX}{schedule_event_id}")
    }

    pub fn attempt_marker_name(activity_name: &str) -> String {
        format!("{RETRY_ATTEMPT_MARKER_PREFIX}{activity_name}")
    }

    pub fn is_retry_timer(timer_id: &str) -> bool {
        timer_id.starts_with(RETRY_TIMER_PREFIX)
    }

    /// Current attempt of an activity, read from its marker (1 if absent)
    pub fn current_attempt(
        ctx: &EventContext<'_>,
        activity_name: &str,
    ) -> Result<u32, HandlerError> {
        let marker = Self::attempt_marker_name(activity_name);
        Ok(ctx.marker_details::<u32>(&marker)?.unwrap_or(1))
    }

    /// React to an activity failure or timeout
    ///
    /// Starts a retry timer when the policy allows another attempt. The
    /// attempt marker is not advanced until the timer fires.
    pub fn on_activity_failure(
        &self,
        ctx: &EventContext<'_>,
        decisions: &mut Decisions,
    ) -> Result<RetryOutcome, HandlerError> {
        ctx.expect_category(EventCategory::Activity)?;

        let activity_name = ctx.activity_type()?.to_string();
        let schedule_event_id = ctx.scheduled_event_id()?;
        let attempt = Self::current_attempt(ctx, &activity_name)?;

        let Some(delay) = self.policy.delay(attempt) else {
            info!(
                activity = %activity_name,
                attempt,
                "Activity retries exhausted"
            );
            return Ok(RetryOutcome::Exhausted { attempt });
        };

        let control = RetryControl {
            schedule_event_id,
            activity_name: activity_name.clone(),
        };
        decisions.start_timer_with_control(
            &Self::retry_timer_id(schedule_event_id),
            delay,
            &control,
        )?;

        debug!(
            activity = %activity_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduled activity retry timer"
        );
        Ok(RetryOutcome::Scheduled { attempt, delay })
    }

    /// Default failure handling: retry, or fail the workflow once exhausted
    pub fn default_on_activity_failure(
        &self,
        ctx: &EventContext<'_>,
        decisions: &mut Decisions,
    ) -> Result<HandlerOutcome, HandlerError> {
        if let RetryOutcome::Exhausted { .. } = self.on_activity_failure(ctx, decisions)? {
            let reason = ctx.reason().unwrap_or(match ctx.event_type() {
                EventType::ActivityTaskTimedOut => "ActivityTaskTimedOut",
                _ => "ActivityTaskFailed",
            });
            decisions.fail_workflow(reason, ctx.event().details());
        }
        Ok(HandlerOutcome::Acted)
    }

    /// React to a fired retry timer
    ///
    /// Appends nothing if cancellation of the workflow has been requested.
    /// Otherwise schedules the activity again from its original record and
    /// records the next attempt number. Needs no policy: the control payload
    /// and the history carry everything, so timers started from user
    /// handlers are honored too.
    pub fn on_retry_timer_fired(
        ctx: &EventContext<'_>,
        decisions: &mut Decisions,
    ) -> Result<HandlerOutcome, HandlerError> {
        let timer_id = ctx.timer_id()?;

        if ctx
            .history()
            .contains(EventType::WorkflowExecutionCancelRequested)
        {
            info!(timer_id, "Cancellation requested, not retrying activity");
            return Ok(HandlerOutcome::Declined);
        }

        let control: RetryControl = ctx
            .control()?
            .ok_or(EventError::MissingField {
                event_id: ctx.event().id(),
                event_type: ctx.event_type(),
                field: "control",
            })?;

        let scheduled = ctx.history().require(control.schedule_event_id)?;
        decisions.reschedule_activity(&scheduled)?;

        let attempt = Self::current_attempt(ctx, &control.activity_name)? + 1;
        decisions.record_marker(&Self::attempt_marker_name(&control.activity_name), &attempt)?;

        info!(
            activity = %control.activity_name,
            attempt,
            "Retrying activity"
        );
        Ok(HandlerOutcome::Acted)
    }
}

impl std::fmt::Debug for RetryHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandlers").finish_non_exhaustive()
    }
}
