//! End-to-end decision task processing against the in-memory service
//!
//! Run with: cargo test -p everruns-flow --test decider_test

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use everruns_flow::decision::{ActivityOptions, Decision, DecisionExecutor, Submission};
use everruns_flow::engine::{
    DecisionTaskContext, DecisionTaskError, EventHandlerRegistry, HandlerError, HandlerOutcome,
    RegistryError, TemplateConfig, WorkflowTemplate,
};
use everruns_flow::history::{
    ActivityType, EventAttributes, EventType, HistoryBuilder, WorkflowExecution, WorkflowType,
};
use everruns_flow::reliability::{ConstantTimeRetryPolicy, RetryControl, RetryHandlers};
use everruns_flow::service::{
    InMemoryWorkflowService, PollDecisionTaskRequest, ScriptedDecisionTask, WorkflowService,
};

fn order() -> WorkflowType {
    WorkflowType::new("order", "1")
}

fn charge() -> ActivityType {
    ActivityType::new("charge", "1")
}

fn execution() -> WorkflowExecution {
    WorkflowExecution::new("order-42", "run-1")
}

fn request() -> PollDecisionTaskRequest {
    PollDecisionTaskRequest::new("shop", "orders", "decider-1")
}

fn service() -> Arc<InMemoryWorkflowService> {
    Arc::new(InMemoryWorkflowService::new().with_poll_wait(Duration::from_millis(20)))
}

fn retrying_template(max_attempts: u32) -> WorkflowTemplate {
    let policy = ConstantTimeRetryPolicy::new(Duration::from_secs(15), Some(max_attempts)).unwrap();
    WorkflowTemplate::new(
        TemplateConfig::new(EventHandlerRegistry::default()).with_retry_policy(Arc::new(policy)),
    )
}

/// Poll one task, run the template over it and submit the result
async fn run_once(
    service: &Arc<InMemoryWorkflowService>,
    template: &WorkflowTemplate,
) -> Result<Submission, DecisionTaskError> {
    let request = request();
    let page = service
        .poll_for_decision_task(&request)
        .await?
        .expect("a decision task was queued");
    let task = DecisionTaskContext::new(service.clone(), request, page);
    let decisions = template.process(&task).await?;
    Ok(DecisionExecutor::new(service.clone())
        .submit(task.task_token(), decisions)
        .await?)
}

#[test_log::test(tokio::test)]
async fn test_workflow_started_invokes_only_matching_handler() {
    let calls = Arc::new(Mutex::new(Vec::<String>::new()));

    let started_calls = calls.clone();
    let other_calls = calls.clone();
    let signal_calls = calls.clone();
    let registry = EventHandlerRegistry::builder()
        .on_workflow_started(&order(), move |ctx, decisions| {
            let input: String = ctx.input()?.unwrap_or_default();
            started_calls.lock().push(format!("order:{input}"));
            decisions.complete_workflow(&input)?;
            Ok(HandlerOutcome::Acted)
        })
        .unwrap()
        .on_workflow_started(&WorkflowType::new("refund", "1"), move |_, _| {
            other_calls.lock().push("refund".to_string());
            Ok(HandlerOutcome::Acted)
        })
        .unwrap()
        .on_signal("workflowInput", move |_, _| {
            signal_calls.lock().push("signal".to_string());
            Ok(HandlerOutcome::Acted)
        })
        .unwrap()
        .build();
    let template = WorkflowTemplate::new(TemplateConfig::new(registry));

    let mut history = HistoryBuilder::started(order(), "\"workflowInput\"");
    history.decision_task_started();
    let service = service();
    service.enqueue_decision_task(ScriptedDecisionTask::new(
        execution(),
        order(),
        history.into_records(),
    ));

    let submission = run_once(&service, &template).await.unwrap();

    assert_eq!(submission, Submission::Accepted { decisions: 1 });
    assert_eq!(*calls.lock(), vec!["order:workflowInput".to_string()]);
    assert_eq!(
        service.decision_responses()[0].decisions,
        vec![Decision::CompleteWorkflowExecution {
            result: Some("\"workflowInput\"".to_string())
        }]
    );
}

#[test_log::test]
fn test_duplicate_registration_fails_before_processing() {
    let result = EventHandlerRegistry::builder()
        .on_signal("approve", |_, _| Ok(HandlerOutcome::Declined))
        .unwrap()
        .on_signal("approve", |_, _| Ok(HandlerOutcome::Declined));

    match result {
        Err(err @ RegistryError::DuplicateHandler(_)) => {
            assert_eq!(
                err.to_string(),
                "a handler is already registered for WorkflowExecutionSignaled(approve)"
            );
        }
        _ => panic!("duplicate registration was accepted"),
    }
}

#[test_log::test(tokio::test)]
async fn test_post_close_decisions_are_not_submitted() {
    let registry = EventHandlerRegistry::builder()
        .on_signal("ship", |_, decisions| {
            decisions.schedule_activity(&charge(), "late", &ActivityOptions::default())?;
            decisions.record_marker("shipped", &true)?;
            decisions.complete_workflow("done")?;
            decisions.start_timer("reminder", Duration::from_secs(60))?;
            decisions.fail_workflow("second close", None);
            Ok(HandlerOutcome::Acted)
        })
        .unwrap()
        .build();
    let template = WorkflowTemplate::new(TemplateConfig::new(registry));

    let mut history = HistoryBuilder::started(order(), "{}");
    let first = history.decision_task_started();
    history.decision_task_completed(first);
    history.signaled("ship", "{}");
    history.decision_task_started();
    let service = service();
    service.enqueue_decision_task(
        ScriptedDecisionTask::new(execution(), order(), history.into_records())
            .with_previous_started_event_id(first),
    );

    run_once(&service, &template).await.unwrap();

    let submitted = &service.decision_responses()[0].decisions;
    assert_eq!(
        submitted,
        &vec![
            Decision::RecordMarker {
                marker_name: "shipped".to_string(),
                details: Some("true".to_string()),
            },
            Decision::CompleteWorkflowExecution {
                result: Some("\"done\"".to_string())
            },
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_failed_handler_submits_nothing() {
    let registry = EventHandlerRegistry::builder()
        .on_workflow_started(&order(), |_, decisions| {
            decisions.complete_workflow("too early")?;
            Err(HandlerError::Failed(anyhow::anyhow!("inventory unavailable")))
        })
        .unwrap()
        .build();
    let template = WorkflowTemplate::new(TemplateConfig::new(registry));

    let mut history = HistoryBuilder::started(order(), "{}");
    history.decision_task_started();
    let service = service();
    service.enqueue_decision_task(ScriptedDecisionTask::new(
        execution(),
        order(),
        history.into_records(),
    ));

    let result = run_once(&service, &template).await;

    assert!(matches!(result, Err(DecisionTaskError::Handler { event_id: 1, .. })));
    assert!(service.decision_responses().is_empty());
    assert_eq!(service.outstanding_decision_tasks(), 1);
}

#[test_log::test(tokio::test)]
async fn test_paged_history_is_loaded_once() {
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut builder = EventHandlerRegistry::builder();
    for name in ["a", "b", "c", "d", "e"] {
        let seen = seen.clone();
        builder = builder
            .on_signal(name, move |ctx, _| {
                seen.lock().push(ctx.signal_name()?.to_string());
                Ok(HandlerOutcome::Acted)
            })
            .unwrap();
    }
    let template = WorkflowTemplate::new(TemplateConfig::new(builder.build()));

    let mut history = HistoryBuilder::started(order(), "{}");
    let first = history.decision_task_started();
    history.decision_task_completed(first);
    for name in ["a", "b", "c", "d", "e"] {
        history.signaled(name, "{}");
    }
    history.decision_task_started();
    let total = history.records().len();

    let service = Arc::new(
        InMemoryWorkflowService::new()
            .with_page_size(3)
            .with_poll_wait(Duration::from_millis(20)),
    );
    service.enqueue_decision_task(
        ScriptedDecisionTask::new(execution(), order(), history.into_records())
            .with_previous_started_event_id(first),
    );

    let request = request();
    let page = service.poll_for_decision_task(&request).await.unwrap().unwrap();
    let task = DecisionTaskContext::new(service.clone(), request, page);

    assert_eq!(task.history().await.unwrap().len(), total);
    let polls = service.decision_poll_count();
    assert_eq!(polls, total.div_ceil(3));

    template.process(&task).await.unwrap();
    assert_eq!(service.decision_poll_count(), polls);
    assert_eq!(*seen.lock(), vec!["a", "b", "c", "d", "e"]);
}

#[test_log::test(tokio::test)]
async fn test_stale_token_is_dropped() {
    let template = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));
    let mut history = HistoryBuilder::started(order(), "{}");
    history.decision_task_started();

    let service = service();
    service.enqueue_decision_task(ScriptedDecisionTask::new(
        execution(),
        order(),
        history.into_records(),
    ));

    let request = request();
    let page = service.poll_for_decision_task(&request).await.unwrap().unwrap();
    let executor = DecisionExecutor::new(service.clone());

    let first = executor.submit(&page.task_token, template.new_decisions()).await.unwrap();
    let second = executor.submit(&page.task_token, template.new_decisions()).await.unwrap();

    assert_eq!(first, Submission::Accepted { decisions: 0 });
    assert_eq!(second, Submission::StaleToken);
}

// ============================================================================
// Replay-derived retries
// ============================================================================

/// History up to an activity failure, seen by the decision task that follows it
fn failed_activity_history() -> (HistoryBuilder, i64, i64) {
    let mut history = HistoryBuilder::started(order(), "{}");
    let first = history.decision_task_started();
    history.decision_task_completed(first);
    let scheduled = history.activity_scheduled(&charge(), "charge-1", "{\"amount\":10}", None);
    let started = history.activity_started(scheduled);
    history.activity_failed(scheduled, started, "CardDeclined", "insufficient funds");
    (history, first, scheduled)
}

#[test_log::test]
fn test_retry_survives_replay() {
    let template = retrying_template(3);

    // Task 1: the failure starts a retry timer
    let (mut history, first, scheduled) = failed_activity_history();
    let second = history.decision_task_started();
    let decisions = template
        .decide(&history.clone().build(), &execution(), &order(), first)
        .unwrap()
        .into_inner();

    let control = match decisions.as_slice() {
        [Decision::StartTimer {
            timer_id,
            start_to_fire_timeout,
            control: Some(control),
        }] => {
            assert_eq!(timer_id, &format!("__retry_timer:{scheduled}"));
            assert_eq!(start_to_fire_timeout, "15");
            control.clone()
        }
        other => panic!("expected a single retry timer, got {other:?}"),
    };
    let parsed: RetryControl = serde_json::from_str(&control).unwrap();
    assert_eq!(
        parsed,
        RetryControl {
            schedule_event_id: scheduled,
            activity_name: "charge:1".to_string(),
        }
    );

    // Task 2: the timer fires; the activity is rescheduled and attempt 2 recorded
    history.decision_task_completed(second);
    let timer_id = format!("__retry_timer:{scheduled}");
    let timer = history.timer_started(&timer_id, 15, Some(control.as_str()));
    history.timer_fired(&timer_id, timer);
    let third = history.decision_task_started();
    let decisions = template
        .decide(&history.clone().build(), &execution(), &order(), second)
        .unwrap()
        .into_inner();

    assert_eq!(decisions.len(), 2);
    match &decisions[0] {
        Decision::ScheduleActivityTask(attrs) => {
            assert_eq!(attrs.activity_type, charge());
            assert_ne!(attrs.activity_id, "charge-1");
            assert_eq!(attrs.input.as_deref(), Some("{\"amount\":10}"));
            assert_eq!(attrs.start_to_close_timeout.as_deref(), Some("300"));
        }
        other => panic!("expected a reschedule, got {other:?}"),
    }
    assert_eq!(
        decisions[1],
        Decision::RecordMarker {
            marker_name: "__retry_attempt:charge:1".to_string(),
            details: Some("2".to_string()),
        }
    );

    // Task 3: the retried activity fails again; the counter comes from the marker
    history.decision_task_completed(third);
    history.marker_recorded("__retry_attempt:charge:1", "2");
    let rescheduled = history.activity_scheduled(&charge(), "charge-2", "{\"amount\":10}", None);
    let started = history.activity_started(rescheduled);
    history.activity_failed(rescheduled, started, "CardDeclined", "insufficient funds");
    history.decision_task_started();
    let decisions = template
        .decide(&history.clone().build(), &execution(), &order(), third)
        .unwrap()
        .into_inner();

    let retry_timer = format!("__retry_timer:{rescheduled}");
    assert!(matches!(
        decisions.as_slice(),
        [Decision::StartTimer { timer_id, .. }] if timer_id == &retry_timer
    ));
}

#[test_log::test]
fn test_retry_started_by_user_handler_is_rescheduled() {
    let policy = ConstantTimeRetryPolicy::new(Duration::from_secs(15), Some(3)).unwrap();
    let retry = RetryHandlers::new(Arc::new(policy));
    let registry = EventHandlerRegistry::builder()
        .on_activity_failed(&charge(), move |ctx, decisions| {
            retry.on_activity_failure(ctx, decisions)?;
            Ok(HandlerOutcome::Acted)
        })
        .unwrap()
        .build();
    let template = WorkflowTemplate::new(TemplateConfig::new(registry));
    assert!(template.config().retry_policy.is_none());

    let (mut history, first, scheduled) = failed_activity_history();
    let second = history.decision_task_started();
    let decisions = template
        .decide(&history.clone().build(), &execution(), &order(), first)
        .unwrap()
        .into_inner();
    let control = match decisions.as_slice() {
        [Decision::StartTimer {
            control: Some(control),
            ..
        }] => control.clone(),
        other => panic!("expected a single retry timer, got {other:?}"),
    };

    history.decision_task_completed(second);
    let timer_id = format!("__retry_timer:{scheduled}");
    let timer = history.timer_started(&timer_id, 15, Some(control.as_str()));
    history.timer_fired(&timer_id, timer);
    history.decision_task_started();
    let decisions = template
        .decide(&history.build(), &execution(), &order(), second)
        .unwrap()
        .into_inner();

    match decisions.as_slice() {
        [Decision::ScheduleActivityTask(attrs), Decision::RecordMarker {
            marker_name,
            details,
        }] => {
            assert_eq!(attrs.activity_type, charge());
            assert_eq!(attrs.input.as_deref(), Some("{\"amount\":10}"));
            assert_eq!(marker_name, "__retry_attempt:charge:1");
            assert_eq!(details.as_deref(), Some("2"));
        }
        other => panic!("retry timer fired but the activity was not rescheduled: {other:?}"),
    }
}

#[test_log::test]
fn test_exhausted_retries_fail_workflow() {
    let template = retrying_template(2);

    let mut history = HistoryBuilder::started(order(), "{}");
    let first = history.decision_task_started();
    history.decision_task_completed(first);
    history.marker_recorded("__retry_attempt:charge:1", "3");
    let scheduled = history.activity_scheduled(&charge(), "charge-3", "{\"amount\":10}", None);
    let started = history.activity_started(scheduled);
    history.activity_failed(scheduled, started, "CardDeclined", "insufficient funds");
    history.decision_task_started();

    let decisions = template
        .decide(&history.build(), &execution(), &order(), first)
        .unwrap()
        .into_inner();

    assert_eq!(
        decisions,
        vec![Decision::FailWorkflowExecution {
            reason: Some("CardDeclined".to_string()),
            details: Some("insufficient funds".to_string()),
        }]
    );
}

#[test_log::test]
fn test_cancel_requested_stops_retry() {
    let template = retrying_template(3);

    let (mut history, _, scheduled) = failed_activity_history();
    let second = history.decision_task_started();
    history.decision_task_completed(second);
    let control = serde_json::to_string(&RetryControl {
        schedule_event_id: scheduled,
        activity_name: "charge:1".to_string(),
    })
    .unwrap();
    let timer_id = format!("__retry_timer:{scheduled}");
    let timer = history.timer_started(&timer_id, 15, Some(control.as_str()));
    history.cancel_requested();
    history.timer_fired(&timer_id, timer);
    history.decision_task_started();

    let decisions = template
        .decide(&history.build(), &execution(), &order(), second)
        .unwrap();

    assert!(decisions.is_empty());
}

// ============================================================================
// Close-rejected defaults
// ============================================================================

#[test_log::test]
fn test_close_rejections() {
    let template = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));

    let mut raced = HistoryBuilder::started(order(), "{}");
    let first = raced.decision_task_started();
    raced.decision_task_completed(first);
    raced.close_rejected(EventType::CompleteWorkflowExecutionFailed, "UNHANDLED_DECISION");
    raced.decision_task_started();
    let decisions = template
        .decide(&raced.build(), &execution(), &order(), first)
        .unwrap();
    assert!(decisions.is_empty());

    let mut rejected = HistoryBuilder::started(order(), "{}");
    let first = rejected.decision_task_started();
    rejected.decision_task_completed(first);
    rejected.close_rejected(
        EventType::ContinueAsNewWorkflowExecutionFailed,
        "WORKFLOW_TYPE_DEPRECATED",
    );
    rejected.decision_task_started();
    let decisions = template
        .decide(&rejected.build(), &execution(), &order(), first)
        .unwrap()
        .into_inner();
    assert_eq!(
        decisions,
        vec![Decision::FailWorkflowExecution {
            reason: Some("WORKFLOW_TYPE_DEPRECATED".to_string()),
            details: None,
        }]
    );
}

// ============================================================================
// Lambda and cancel-failure events
// ============================================================================

#[test_log::test]
fn test_lambda_start_failure_reaches_its_handler() {
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorded = seen.clone();
    let registry = EventHandlerRegistry::builder()
        .on(EventType::StartLambdaFunctionFailed, "thumbnail", move |ctx, decisions| {
            let cause = ctx.cause().unwrap_or_default();
            recorded.lock().push(format!("{}:{cause}", ctx.lambda_id()?));
            decisions.fail_workflow(cause, None);
            Ok(HandlerOutcome::Acted)
        })
        .unwrap()
        .build();

    let mut history = HistoryBuilder::started(order(), "{}");
    let first = history.decision_task_started();
    history.decision_task_completed(first);
    let scheduled = history.push(
        EventType::LambdaFunctionScheduled,
        EventAttributes {
            lambda_id: Some("thumb-1".to_string()),
            lambda_name: Some("thumbnail".to_string()),
            ..Default::default()
        },
    );
    history.push(
        EventType::StartLambdaFunctionFailed,
        EventAttributes {
            scheduled_event_id: Some(scheduled),
            cause: Some("ASSUME_ROLE_FAILED".to_string()),
            ..Default::default()
        },
    );
    history.decision_task_started();
    let history = history.build();

    let template = WorkflowTemplate::new(TemplateConfig::new(registry));
    let decisions = template
        .decide(&history, &execution(), &order(), first)
        .unwrap()
        .into_inner();
    assert_eq!(*seen.lock(), vec!["thumb-1:ASSUME_ROLE_FAILED".to_string()]);
    assert_eq!(
        decisions,
        vec![Decision::FailWorkflowExecution {
            reason: Some("ASSUME_ROLE_FAILED".to_string()),
            details: None,
        }]
    );

    let unhandled = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));
    let decisions = unhandled
        .decide(&history, &execution(), &order(), first)
        .unwrap();
    assert!(decisions.is_empty());
}

#[test_log::test]
fn test_cancel_failure_for_unknown_activity_is_dispatched() {
    let causes = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorded = causes.clone();
    let registry = EventHandlerRegistry::builder()
        .on(EventType::RequestCancelActivityTaskFailed, "", move |ctx, _| {
            recorded.lock().push(ctx.cause().unwrap_or_default().to_string());
            Ok(HandlerOutcome::Acted)
        })
        .unwrap()
        .build();

    let mut history = HistoryBuilder::started(order(), "{}");
    let first = history.decision_task_started();
    history.decision_task_completed(first);
    history.push(
        EventType::RequestCancelActivityTaskFailed,
        EventAttributes {
            activity_id: Some("never-scheduled".to_string()),
            cause: Some("ACTIVITY_ID_UNKNOWN".to_string()),
            ..Default::default()
        },
    );
    history.decision_task_started();
    let history = history.build();

    let template = WorkflowTemplate::new(TemplateConfig::new(registry));
    let decisions = template
        .decide(&history, &execution(), &order(), first)
        .unwrap();
    assert!(decisions.is_empty());
    assert_eq!(*causes.lock(), vec!["ACTIVITY_ID_UNKNOWN".to_string()]);

    let unhandled = WorkflowTemplate::new(TemplateConfig::new(EventHandlerRegistry::default()));
    assert!(unhandled
        .decide(&history, &execution(), &order(), first)
        .is_ok());
}
