//! Decision worker: poll, decide, submit

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::poller::{Poller, PollerError, WorkerConfig, WorkerError, WorkerStatus};
use crate::decision::{DecisionExecutor, Submission};
use crate::engine::{DecisionTaskContext, WorkflowTemplate};
use crate::service::{PollDecisionTaskRequest, WorkflowService};

/// Polls decision tasks and drives them through a [`WorkflowTemplate`]
///
/// Tasks are processed one at a time. A task that fails is logged and left
/// for the service to redeliver; the loop keeps polling. Only a hung poll
/// ends the loop.
pub struct DecisionWorker {
    service: Arc<dyn WorkflowService>,
    template: Arc<WorkflowTemplate>,
    executor: DecisionExecutor,
    config: WorkerConfig,
    status: Arc<RwLock<WorkerStatus>>,
    shutdown_tx: watch::Sender<bool>,
    poll_handle: Mutex<Option<JoinHandle<Result<(), PollerError>>>>,
}

impl DecisionWorker {
    /// Create a new decision worker
    pub fn new(
        service: Arc<dyn WorkflowService>,
        template: WorkflowTemplate,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            executor: DecisionExecutor::new(service.clone()),
            service,
            template: Arc::new(template),
            config,
            status: Arc::new(RwLock::new(WorkerStatus::Stopped)),
            shutdown_tx,
            poll_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    /// Start the poll loop on a background task
    #[instrument(
        skip(self),
        fields(domain = %self.config.domain, task_list = %self.config.task_list)
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
        let poller = Poller::new(self.config.poller.clone(), self.shutdown_tx.subscribe());
        let request = self.request();
        let service = self.service.clone();
        let template = self.template.clone();
        let executor = self.executor.clone();
        let status = self.status.clone();

        let handle = tokio::spawn(async move {
            let result = poll_loop(poller, request, service, template, executor).await;
            *status.write() = WorkerStatus::Stopped;
            result
        });
        *self.poll_handle.lock() = Some(handle);

        info!(identity = %self.config.identity, "Decision worker started");
        Ok(())
    }

    /// Signal the poll loop to stop
    ///
    /// An in-flight poll is abandoned. A task already being processed is
    /// not waited for.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        info!("Decision worker stopping");
    }

    /// Stop and wait for the poll loop to exit
    ///
    /// Returns the loop's fatal error if it ended on one.
    pub async fn join(&self) -> Result<(), WorkerError> {
        self.stop();
        let handle = self.poll_handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => result?,
                Err(e) => error!(error = %e, "Decision poll loop panicked"),
            }
        }
        *self.status.write() = WorkerStatus::Stopped;
        Ok(())
    }

    /// Poll once and process the task, if any
    ///
    /// Processing errors are logged, not returned.
    pub async fn poll_once(&self) -> Result<bool, WorkerError> {
        let (_tx, rx) = watch::channel(false);
        let mut poller = Poller::new(self.config.poller.clone(), rx);
        let request = self.request();

        match poller
            .poll(self.service.poll_for_decision_task(&request))
            .await?
        {
            Some(page) => {
                let task = DecisionTaskContext::new(self.service.clone(), request, page);
                handle_decision_task(&self.template, &self.executor, task).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn request(&self) -> PollDecisionTaskRequest {
        PollDecisionTaskRequest::new(
            &self.config.domain,
            &self.config.task_list,
            &self.config.identity,
        )
    }
}

async fn poll_loop(
    mut poller: Poller,
    request: PollDecisionTaskRequest,
    service: Arc<dyn WorkflowService>,
    template: Arc<WorkflowTemplate>,
    executor: DecisionExecutor,
) -> Result<(), PollerError> {
    loop {
        match poller.poll(service.poll_for_decision_task(&request)).await {
            Ok(Some(page)) => {
                let task = DecisionTaskContext::new(service.clone(), request.clone(), page);
                handle_decision_task(&template, &executor, task).await;
            }
            Ok(None) => {
                debug!("No decision task in this poll window");
            }
            Err(PollerError::Shutdown) => break,
            Err(PollerError::Service(e)) => {
                if poller.back_off(&e).await {
                    break;
                }
            }
            Err(e @ PollerError::HardTimeout(_)) => {
                error!(error = %e, "Decision poll loop stopped");
                return Err(e);
            }
        }
    }

    info!("Decision worker stopped");
    Ok(())
}

async fn handle_decision_task(
    template: &WorkflowTemplate,
    executor: &DecisionExecutor,
    task: DecisionTaskContext,
) {
    let decisions = match template.process(&task).await {
        Ok(decisions) => decisions,
        Err(e) => {
            error!(
                workflow_id = %task.workflow_execution().workflow_id,
                error = %e,
                "Decision task failed, leaving it for redelivery"
            );
            return;
        }
    };

    match executor.submit(task.task_token(), decisions).await {
        Ok(Submission::Accepted { .. }) => {}
        Ok(Submission::StaleToken) => {
            warn!(
                workflow_id = %task.workflow_execution().workflow_id,
                "Decision task expired before submission"
            );
        }
        Err(e) => {
            error!(
                workflow_id = %task.workflow_execution().workflow_id,
                error = %e,
                "Failed to submit decisions"
            );
        }
    }
}
