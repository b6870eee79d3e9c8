//! Activity worker: bounded-concurrency execution of activity tasks

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::poller::{Poller, PollerError, WorkerConfig, WorkerError, WorkerStatus};
use crate::history::ActivityType;
use crate::service::{ActivityTask, PollActivityTaskRequest, WorkflowService};

/// Failure reason reported for tasks with no registered handler
pub const UNKNOWN_ACTIVITY_TYPE_REASON: &str = "UnknownActivityType";

/// Failure reason reported when a handler panics
pub const ACTIVITY_PANICKED_REASON: &str = "ActivityPanicked";

/// An activity that did not complete
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ActivityFailure {
    pub reason: String,
    pub details: Option<String>,
}

impl ActivityFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<anyhow::Error> for ActivityFailure {
    fn from(err: anyhow::Error) -> Self {
        Self {
            reason: err.to_string(),
            details: Some(format!("{err:?}")),
        }
    }
}

/// Result of running one activity: serialized output or a failure
pub type ActivityResult = Result<Option<String>, ActivityFailure>;

/// A registered activity implementation
pub type ActivityHandler =
    Arc<dyn Fn(ActivityTask) -> BoxFuture<'static, ActivityResult> + Send + Sync>;

const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Activity worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityWorkerConfig {
    pub worker: WorkerConfig,

    /// Maximum activities executing at once
    pub max_concurrency: usize,

    /// How long shutdown waits for in-flight activities
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
}

impl Default for ActivityWorkerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ActivityWorkerConfig {
    pub fn new(worker: WorkerConfig) -> Self {
        Self {
            worker,
            ..Default::default()
        }
    }

    /// Load from environment
    ///
    /// Reads the [`WorkerConfig::from_env`] variables plus
    /// `FLOW_MAX_CONCURRENT_ACTIVITIES`.
    pub fn from_env() -> Self {
        let max_concurrency =
            parse_max_concurrency(std::env::var("FLOW_MAX_CONCURRENT_ACTIVITIES").ok());

        Self {
            worker: WorkerConfig::from_env(),
            max_concurrency,
            ..Default::default()
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Concurrency from an env value; unparseable falls back to the default
/// and zero is raised to one
fn parse_max_concurrency(value: Option<String>) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENCY)
        .max(1)
}

/// Polls activity tasks and runs registered handlers on a bounded pool
///
/// A permit is taken before each poll so the worker never claims a task it
/// has no capacity for. Results are reported as completed or failed;
/// handler panics are reported as failures.
pub struct ActivityWorker {
    service: Arc<dyn WorkflowService>,
    config: ActivityWorkerConfig,
    handlers: RwLock<HashMap<ActivityType, ActivityHandler>>,
    semaphore: Arc<Semaphore>,
    status: Arc<RwLock<WorkerStatus>>,
    shutdown_tx: watch::Sender<bool>,
    poll_handle: Mutex<Option<JoinHandle<Result<(), PollerError>>>>,
}

impl ActivityWorker {
    /// Create a new activity worker
    ///
    /// A `max_concurrency` of zero is raised to one.
    pub fn new(service: Arc<dyn WorkflowService>, mut config: ActivityWorkerConfig) -> Self {
        config.max_concurrency = config.max_concurrency.max(1);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            service,
            config,
            handlers: RwLock::new(HashMap::new()),
            status: Arc::new(RwLock::new(WorkerStatus::Stopped)),
            shutdown_tx,
            poll_handle: Mutex::new(None),
        }
    }

    /// Register the implementation of `activity_type`
    ///
    /// Handlers registered after [`start`](Self::start) are picked up on
    /// the next start.
    pub fn register<F, Fut>(
        &self,
        activity_type: ActivityType,
        handler: F,
    ) -> Result<(), WorkerError>
    where
        F: Fn(ActivityTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActivityResult> + Send + 'static,
    {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&activity_type) {
            return Err(WorkerError::DuplicateActivity(activity_type));
        }
        debug!(%activity_type, "Registered activity handler");
        handlers.insert(activity_type, Arc::new(move |task| handler(task).boxed()));
        Ok(())
    }

    pub fn config(&self) -> &ActivityWorkerConfig {
        &self.config
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    /// Activities currently executing
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency - self.semaphore.available_permits()
    }

    /// Start the poll loop on a background task
    #[instrument(
        skip(self),
        fields(
            domain = %self.config.worker.domain,
            task_list = %self.config.worker.task_list,
        )
    )]
    pub fn start(&self) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            if *status != WorkerStatus::Stopped {
                return Err(WorkerError::AlreadyRunning);
            }
            *status = WorkerStatus::Running;
        }

        self.shutdown_tx.send_replace(false);
        let poller = Poller::new(
            self.config.worker.poller.clone(),
            self.shutdown_tx.subscribe(),
        );
        let request = PollActivityTaskRequest::new(
            &self.config.worker.domain,
            &self.config.worker.task_list,
            &self.config.worker.identity,
        );
        let runner = Runner {
            service: self.service.clone(),
            handlers: Arc::new(self.handlers.read().clone()),
            semaphore: self.semaphore.clone(),
        };

        let handle = tokio::spawn(runner.poll_loop(poller, request, self.shutdown_tx.subscribe()));
        *self.poll_handle.lock() = Some(handle);

        info!(
            identity = %self.config.worker.identity,
            max_concurrency = self.config.max_concurrency,
            "Activity worker started"
        );
        Ok(())
    }

    /// Stop polling and wait for in-flight activities to finish
    ///
    /// Waits up to the configured shutdown timeout; activities still running
    /// after that are left to finish on their own.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        *self.status.write() = WorkerStatus::Draining;
        self.shutdown_tx.send_replace(true);
        info!("Activity worker draining");

        let handle = self.poll_handle.lock().take();
        let loop_result = match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Activity poll loop panicked");
                    Ok(())
                }
            },
            None => Ok(()),
        };

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                let remaining = self.in_flight();
                warn!(remaining, "Shutdown timeout reached with activities in flight");
                *self.status.write() = WorkerStatus::Stopped;
                return Err(WorkerError::ShutdownTimeout(remaining));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.status.write() = WorkerStatus::Stopped;
        info!("Activity worker stopped");
        loop_result.map_err(WorkerError::from)
    }
}

// ============================================================================
// Poll loop
// ============================================================================

struct Runner {
    service: Arc<dyn WorkflowService>,
    handlers: Arc<HashMap<ActivityType, ActivityHandler>>,
    semaphore: Arc<Semaphore>,
}

impl Runner {
    async fn poll_loop(
        self,
        mut poller: Poller,
        request: PollActivityTaskRequest,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), PollerError> {
        loop {
            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_rx.changed() => break,
            };

            match poller.poll(self.service.poll_for_activity_task(&request)).await {
                Ok(Some(task)) => {
                    let service = self.service.clone();
                    let handler = self.handlers.get(&task.activity_type).cloned();
                    tokio::spawn(async move {
                        execute(service, handler, task).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    debug!("No activity task in this poll window");
                }
                Err(PollerError::Shutdown) => break,
                Err(PollerError::Service(e)) => {
                    drop(permit);
                    if poller.back_off(&e).await {
                        break;
                    }
                }
                Err(e @ PollerError::HardTimeout(_)) => {
                    error!(error = %e, "Activity poll loop stopped");
                    return Err(e);
                }
            }
        }

        debug!("Activity poll loop exited");
        Ok(())
    }
}

#[instrument(
    skip(service, handler, task),
    fields(activity_type = %task.activity_type, activity_id = %task.activity_id)
)]
async fn execute(
    service: Arc<dyn WorkflowService>,
    handler: Option<ActivityHandler>,
    task: ActivityTask,
) {
    let task_token = task.task_token.clone();

    let result = match handler {
        // the handler is invoked inside the guard so a panic while building
        // its future is reported too
        Some(handler) => {
            let run = async move { handler(task).await };
            match std::panic::AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(ActivityFailure::new(ACTIVITY_PANICKED_REASON)),
            }
        }
        None => {
            warn!("No handler registered for activity type");
            Err(ActivityFailure::new(UNKNOWN_ACTIVITY_TYPE_REASON)
                .with_details(format!("no handler for {}", task.activity_type)))
        }
    };

    let reported = match result {
        Ok(output) => {
            debug!("Activity completed");
            service.respond_activity_task_completed(&task_token, output).await
        }
        Err(failure) => {
            warn!(reason = %failure.reason, "Activity failed");
            service
                .respond_activity_task_failed(&task_token, &failure.reason, failure.details)
                .await
        }
    };

    if let Err(e) = reported {
        error!(error = %e, "Failed to report activity result");
    }
}

/// Serde support for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
