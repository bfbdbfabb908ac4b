//! Notification counters, labelled by channel type.

mod helpers;

use alertrelay::core::{AlertState, EvalContext, RuleRef};
use alertrelay::internal_metrics::{
    NOTIFICATIONS_FAILED, NOTIFICATIONS_SENT, NOTIFICATIONS_SKIPPED, NOTIFICATION_DURATION,
};
use alertrelay::notification::test_utils::FakeNotifier;
use alertrelay::notification::{DispatchConfig, Dispatcher, Notifier, NotifyError};
use std::sync::Arc;

fn ctx(state: AlertState, previous: AlertState) -> Arc<EvalContext> {
    let rule = RuleRef {
        id: 1,
        name: "r".to_string(),
        ..Default::default()
    };
    Arc::new(EvalContext::new(rule, state).with_previous_state(previous))
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(DispatchConfig {
        max_retries: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_sent_counter_counts_successful_sends() {
    let metrics = helpers::test_metrics::global();
    let fake = Arc::new(FakeNotifier::new(1, "metrics-sent"));
    let notifiers = vec![fake.clone() as Arc<dyn Notifier>];
    let dispatcher = dispatcher();

    dispatcher
        .dispatch(ctx(AlertState::Alerting, AlertState::Ok), &notifiers)
        .await
        .unwrap();
    dispatcher
        .dispatch(ctx(AlertState::Ok, AlertState::Alerting), &notifiers)
        .await
        .unwrap();

    assert_eq!(metrics.get_counter(NOTIFICATIONS_SENT, "metrics-sent"), 2);
    assert_eq!(metrics.get_counter(NOTIFICATIONS_FAILED, "metrics-sent"), 0);
    assert_eq!(metrics.histogram_count(NOTIFICATION_DURATION, "metrics-sent"), 2);
}

#[tokio::test]
async fn test_failure_counted_once_after_retries() {
    let metrics = helpers::test_metrics::global();
    let fake = Arc::new(FakeNotifier::new(1, "metrics-failed"));
    fake.push_result(Err(NotifyError::delivery("metrics-failed", "503")));
    fake.push_result(Err(NotifyError::delivery("metrics-failed", "503")));

    dispatcher()
        .dispatch(
            ctx(AlertState::Alerting, AlertState::Ok),
            &[fake.clone() as Arc<dyn Notifier>],
        )
        .await
        .unwrap_err();

    assert_eq!(metrics.get_counter(NOTIFICATIONS_FAILED, "metrics-failed"), 1);
    assert_eq!(metrics.get_counter(NOTIFICATIONS_SENT, "metrics-failed"), 0);
    // One duration sample per attempt.
    assert_eq!(metrics.histogram_count(NOTIFICATION_DURATION, "metrics-failed"), 2);
}

#[tokio::test]
async fn test_skips_are_counted() {
    let metrics = helpers::test_metrics::global();
    let fake = Arc::new(FakeNotifier::new(1, "metrics-skipped").with_auto_resolve(false));

    dispatcher()
        .dispatch(
            ctx(AlertState::Ok, AlertState::Alerting),
            &[fake.clone() as Arc<dyn Notifier>],
        )
        .await
        .unwrap();

    assert_eq!(metrics.get_counter(NOTIFICATIONS_SKIPPED, "metrics-skipped"), 1);
    assert_eq!(metrics.get_counter(NOTIFICATIONS_SENT, "metrics-skipped"), 0);
}
