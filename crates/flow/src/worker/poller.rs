//! Long-poll driver with cancellation and error backoff

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::history::ActivityType;
use crate::service::ServiceError;

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// The remote service's own long-poll window
    #[serde(with = "duration_millis")]
    pub long_poll_timeout: Duration,

    /// Extra local wait beyond the window before a poll counts as hung
    #[serde(with = "duration_millis")]
    pub timeout_margin: Duration,

    /// First wait after a failed poll
    #[serde(with = "duration_millis")]
    pub min_backoff: Duration,

    /// Upper bound on the wait after repeated failures
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,

    /// Backoff multiplier per consecutive failure
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout: Duration::from_secs(60),
            timeout_margin: Duration::from_secs(10),
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl PollerConfig {
    /// Create a new poller configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the long-poll window
    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    /// Set the hard-timeout margin
    pub fn with_timeout_margin(mut self, margin: Duration) -> Self {
        self.timeout_margin = margin;
        self
    }

    /// Set minimum error backoff
    pub fn with_min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    /// Set maximum error backoff
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Local deadline for one poll call
    pub fn hard_timeout(&self) -> Duration {
        self.long_poll_timeout + self.timeout_margin
    }
}

/// Identity and polling settings shared by both workers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub domain: String,
    pub task_list: String,

    /// Identity reported to the service (generated if not provided)
    pub identity: String,

    pub poller: PollerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            task_list: "default".to_string(),
            identity: format!("worker-{}", Uuid::now_v7()),
            poller: PollerConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(domain: impl Into<String>, task_list: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            task_list: task_list.into(),
            ..Default::default()
        }
    }

    /// Load from `FLOW_DOMAIN`, `FLOW_TASK_LIST` and `FLOW_IDENTITY`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            domain: std::env::var("FLOW_DOMAIN").unwrap_or(defaults.domain),
            task_list: std::env::var("FLOW_TASK_LIST").unwrap_or(defaults.task_list),
            identity: std::env::var("FLOW_IDENTITY").unwrap_or(defaults.identity),
            poller: defaults.poller,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }
}

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Worker is polling
    Running,
    /// Worker stopped polling and is finishing in-flight work
    Draining,
    /// Worker has stopped
    Stopped,
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// A poll outlived the long-poll window plus margin
    #[error("poll did not return within {0:?}")]
    HardTimeout(Duration),

    /// Service error
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// Worker shutdown
    #[error("worker is shutting down")]
    Shutdown,
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Worker already running
    #[error("worker is already running")]
    AlreadyRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out with {0} activities in flight")]
    ShutdownTimeout(usize),

    /// Two handlers for one activity type
    #[error("a handler is already registered for activity type {0}")]
    DuplicateActivity(ActivityType),

    /// Poll loop ended with a fatal error
    #[error("poller error: {0}")]
    Poller(#[from] PollerError),
}

/// Long-poll driver
///
/// Wraps each poll in a hard timeout, abandons it when shutdown is
/// signaled and backs off exponentially after failures.
pub struct Poller {
    config: PollerConfig,
    current_backoff: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl Poller {
    /// Create a new poller
    pub fn new(config: PollerConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            current_backoff: config.min_backoff,
            config,
            shutdown_rx,
        }
    }

    /// Run one poll
    ///
    /// `Ok(None)` is the normal "no task in this window" result.
    pub async fn poll<T, Fut>(&mut self, poll: Fut) -> Result<Option<T>, PollerError>
    where
        Fut: Future<Output = Result<Option<T>, ServiceError>>,
    {
        if self.is_shutdown() {
            return Err(PollerError::Shutdown);
        }

        let hard_timeout = self.config.hard_timeout();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let result = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during poll");
                return Err(PollerError::Shutdown);
            }
            result = tokio::time::timeout(hard_timeout, poll) => result,
        };

        match result {
            Err(_) => {
                error!(
                    timeout_ms = hard_timeout.as_millis() as u64,
                    "Poll exceeded hard timeout"
                );
                Err(PollerError::HardTimeout(hard_timeout))
            }
            Ok(Ok(task)) => {
                self.reset_backoff();
                Ok(task)
            }
            Ok(Err(e)) => Err(PollerError::Service(e)),
        }
    }

    /// Log a service error and wait out the backoff
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn back_off(&mut self, error: &ServiceError) -> bool {
        let backoff_ms = self.current_backoff.as_millis() as u64;
        if error.is_retryable() {
            warn!(%error, backoff_ms, "Poll failed, backing off");
        } else {
            error!(%error, backoff_ms, "Poll rejected, backing off");
        }

        let wait = self.current_backoff;
        self.increase_backoff();

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => false,
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during backoff");
                true
            }
        }
    }

    /// Get the current backoff
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_backoff = self.config.min_backoff;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_backoff.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_backoff = next.min(self.config.max_backoff);
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
