//! Reliability patterns
//!
//! - [`RetryPolicy`] pure attempt-to-delay strategies
//! - [`RetryHandlers`] replay-derived retry orchestration

mod handlers;
mod retry;

pub use handlers::{
    RetryControl, RetryHandlers, RetryOutcome, RETRY_ATTEMPT_MARKER_PREFIX, RETRY_TIMER_PREFIX,
};
pub use retry::{
    ConstantTimeRetryPolicy, ExponentialRetryPolicy, NoRetryPolicy, RetryPolicy, RetryPolicyError,
};
