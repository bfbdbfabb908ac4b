//! Fans an evaluation out to every attached notifier.
//!
//! Each (rule, notifier) pair owns a lane: a FIFO drained by one spawned task.
//! `dispatch` decides skips and enqueues deliveries before it returns its
//! future, so the order in which evaluation cycles call it is the order in
//! which each channel receives them, regardless of when the futures are
//! polled. Different channels never wait on each other.
//!
//! A lane with nothing to deliver for `lane_idle_timeout_ms` closes itself,
//! so rules that stop firing do not keep tasks alive.

use crate::core::{AlertState, EvalContext};
use crate::internal_metrics::{
    NOTIFICATIONS_FAILED, NOTIFICATIONS_SENT, NOTIFICATIONS_SKIPPED, NOTIFICATION_DURATION,
};
use crate::notification::{Notifier, NotifierBindings, NotifyError, SkipReason};
use futures::FutureExt;
use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, instrument, warn, Instrument};

/// How a dispatch with failed channels is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Fail only when every attached channel failed.
    #[default]
    BestEffort,
    /// Fail when any attached channel failed.
    RequireAll,
}

/// Retry, timeout and lane settings for the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Retries after the first attempt, for retryable errors only.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each one after it.
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between retries, before jitter.
    pub max_backoff_ms: u64,
    /// Limit on a single `notify` call.
    pub attempt_timeout_ms: u64,
    /// How long a lane waits for work before closing itself.
    pub lane_idle_timeout_ms: u64,
    pub policy: DeliveryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            attempt_timeout_ms: 10_000,
            lane_idle_timeout_ms: 300_000,
            policy: DeliveryPolicy::BestEffort,
        }
    }
}

impl DispatchConfig {
    /// Limit on a single delivery attempt.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn lane_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.lane_idle_timeout_ms)
    }

    /// Delay before retry number `retry` (zero-based): exponential, capped,
    /// plus up to 10% jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(self.max_backoff_ms);
        let jitter = if base >= 10 {
            rand::rng().random_range(0..=base / 10)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Final status of one attached notifier.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStatus {
    Sent,
    Skipped(SkipReason),
    Failed(NotifyError),
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Sent => f.write_str("sent"),
            ChannelStatus::Skipped(reason) => write!(f, "skipped ({})", reason),
            ChannelStatus::Failed(e) => write!(f, "failed ({})", e),
        }
    }
}

/// What happened to one attached notifier during a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub notifier_id: i64,
    pub name: String,
    pub kind: String,
    pub status: ChannelStatus,
    /// Delivery attempts made; zero when skipped or cancelled before sending.
    pub attempts: u32,
}

/// Per-channel outcomes of one dispatch, in the order notifiers were given.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub rule_id: i64,
    pub state: AlertState,
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    /// Number of channels that delivered.
    pub fn sent(&self) -> usize {
        self.count(|s| matches!(s, ChannelStatus::Sent))
    }

    /// Number of channels whose send policy declined the evaluation.
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ChannelStatus::Skipped(_)))
    }

    /// Number of channels that failed, including cancelled deliveries.
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ChannelStatus::Failed(_)))
    }

    /// True when there was at least one channel and every one of them failed.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.failed() == self.outcomes.len()
    }

    fn count(&self, f: impl Fn(&ChannelStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.status)).count()
    }

    fn failed_names(&self) -> String {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ChannelStatus::Failed(_)))
            .map(|o| o.name.as_str())
            .join(", ")
    }
}

/// Returned when a dispatch's failures violate the delivery policy.
///
/// Both variants carry the full report, so callers can still see which
/// channels succeeded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("all notification channels failed for rule {}: {}", .report.rule_id, .report.failed_names())]
    AllChannelsFailed { report: DispatchReport },

    #[error("{} of {} notification channels failed for rule {}: {}", .report.failed(), .report.outcomes.len(), .report.rule_id, .report.failed_names())]
    ChannelsFailed { report: DispatchReport },
}

impl DispatchError {
    /// The report of the dispatch that failed.
    pub fn report(&self) -> &DispatchReport {
        match self {
            DispatchError::AllChannelsFailed { report } | DispatchError::ChannelsFailed { report } => report,
        }
    }
}

struct DeliveryJob {
    ctx: Arc<EvalContext>,
    notifier: Arc<dyn Notifier>,
    reply: oneshot::Sender<(ChannelStatus, u32)>,
}

type LaneKey = (i64, i64);

struct Lane {
    id: u64,
    queue: async_channel::Sender<DeliveryJob>,
    drained: JoinHandle<()>,
}

#[derive(Default)]
struct Lanes {
    open: HashMap<LaneKey, Lane>,
    // Lanes closed by `forget_rule` that may still be draining. A lane
    // reopened for the same key waits for its predecessor first.
    retired: HashMap<LaneKey, JoinHandle<()>>,
    next_id: u64,
}

enum Pending {
    Done(ChannelStatus),
    Queued(oneshot::Receiver<(ChannelStatus, u32)>),
}

/// Delivers evaluation contexts to notifiers.
///
/// Must be used from within a Tokio runtime; lanes are spawned on demand.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<DispatchConfig>,
    lanes: Arc<Mutex<Lanes>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("lanes", &self.lane_count())
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no open lanes.
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config: Arc::new(config),
            lanes: Arc::new(Mutex::new(Lanes::default())),
        }
    }

    /// The retry and policy settings this dispatcher was built with.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatches `ctx` to `notifiers`.
    ///
    /// Skips are decided and deliveries queued before this returns; the
    /// future only waits for the queued deliveries to finish. Dropping the
    /// future does not stop them; cancel `ctx.cancel` for that.
    pub fn dispatch(
        &self,
        ctx: Arc<EvalContext>,
        notifiers: &[Arc<dyn Notifier>],
    ) -> impl Future<Output = Result<DispatchReport, DispatchError>> + Send + 'static {
        let span = info_span!("dispatch", rule_id = ctx.rule.id, state = %ctx.state);
        let entered = span.enter();

        let mut pending = Vec::with_capacity(notifiers.len());
        for notifier in notifiers {
            let base = notifier.base();
            let slot = match notifier.skip_reason(&ctx) {
                Some(reason) => {
                    debug!(notifier = %base.name, reason = %reason, "Skipping notifier");
                    metrics::counter!(NOTIFICATIONS_SKIPPED, "type" => base.kind.clone()).increment(1);
                    Pending::Done(ChannelStatus::Skipped(reason))
                }
                None => Pending::Queued(self.enqueue(ctx.clone(), notifier.clone())),
            };
            pending.push((base.id, base.name.clone(), base.kind.clone(), slot));
        }

        let policy = self.config.policy;
        let (rule_id, state) = (ctx.rule.id, ctx.state);
        drop(entered);

        async move {
            let mut outcomes = Vec::with_capacity(pending.len());
            for (notifier_id, name, kind, slot) in pending {
                let (status, attempts) = match slot {
                    Pending::Done(status) => (status, 0),
                    Pending::Queued(rx) => rx.await.unwrap_or_else(|_| {
                        (
                            ChannelStatus::Failed(NotifyError::delivery(&kind, "delivery lane stopped")),
                            0,
                        )
                    }),
                };
                outcomes.push(ChannelOutcome {
                    notifier_id,
                    name,
                    kind,
                    status,
                    attempts,
                });
            }

            let report = DispatchReport {
                rule_id,
                state,
                outcomes,
            };
            debug!(
                sent = report.sent(),
                skipped = report.skipped(),
                failed = report.failed(),
                "Dispatch finished"
            );

            match policy {
                DeliveryPolicy::BestEffort if report.all_failed() => {
                    Err(DispatchError::AllChannelsFailed { report })
                }
                DeliveryPolicy::RequireAll if report.failed() > 0 => {
                    Err(DispatchError::ChannelsFailed { report })
                }
                _ => Ok(report),
            }
        }
        .instrument(span.clone())
    }

    /// Dispatches `ctx` to every notifier `bindings` attaches to its rule.
    pub fn dispatch_rule(
        &self,
        ctx: Arc<EvalContext>,
        bindings: &NotifierBindings,
    ) -> impl Future<Output = Result<DispatchReport, DispatchError>> + Send + 'static {
        let notifiers = bindings.attached(&ctx.rule);
        self.dispatch(ctx, &notifiers)
    }

    /// Closes the lanes of a deleted rule and returns how many were open.
    ///
    /// Queued deliveries still run. If the rule fires again, its new lanes
    /// start only after the old ones have drained, so per-channel order holds.
    pub fn forget_rule(&self, rule_id: i64) -> usize {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        lanes.retired.retain(|_, drained| !drained.is_finished());

        let keys: Vec<LaneKey> = lanes
            .open
            .keys()
            .filter(|(rule, _)| *rule == rule_id)
            .copied()
            .collect();
        for key in &keys {
            if let Some(lane) = lanes.open.remove(key) {
                lanes.retired.insert(*key, lane.drained);
            }
        }
        keys.len()
    }

    /// Number of open lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).open.len()
    }

    fn enqueue(
        &self,
        ctx: Arc<EvalContext>,
        notifier: Arc<dyn Notifier>,
    ) -> oneshot::Receiver<(ChannelStatus, u32)> {
        let (reply, rx) = oneshot::channel();
        let key = (ctx.rule.id, notifier.base().id);
        let mut job = DeliveryJob {
            ctx,
            notifier,
            reply,
        };

        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lane) = lanes.open.get(&key) {
            match lane.queue.try_send(job) {
                Ok(()) => return rx,
                Err(e) => job = e.into_inner(),
            }
        }

        let id = lanes.next_id;
        lanes.next_id += 1;
        let previous = lanes.retired.remove(&key);
        let (sender, queue) = async_channel::unbounded();
        // The receiver was just created, so the queue cannot be closed.
        let _ = sender.try_send(job);
        let drained = tokio::spawn(run_lane(
            LaneTask {
                key,
                id,
                queue,
                config: self.config.clone(),
                lanes: self.lanes.clone(),
            },
            previous,
        ));
        lanes.open.insert(
            key,
            Lane {
                id,
                queue: sender,
                drained,
            },
        );
        rx
    }
}

struct LaneTask {
    key: LaneKey,
    id: u64,
    queue: async_channel::Receiver<DeliveryJob>,
    config: Arc<DispatchConfig>,
    lanes: Arc<Mutex<Lanes>>,
}

impl LaneTask {
    /// Removes this lane from the table if it is still the open lane for its
    /// key and nothing was queued meanwhile. Enqueueing holds the same lock.
    fn close_if_idle(&self) -> bool {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        let current = lanes.open.get(&self.key).is_some_and(|lane| lane.id == self.id);
        if current && self.queue.is_empty() {
            lanes.open.remove(&self.key);
            return true;
        }
        false
    }
}

async fn run_lane(lane: LaneTask, previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let idle = lane.config.lane_idle_timeout();
    loop {
        let job = match tokio::time::timeout(idle, lane.queue.recv()).await {
            Ok(Ok(job)) => job,
            // Closed by `forget_rule` and drained.
            Ok(Err(_)) => break,
            Err(_) => {
                if lane.close_if_idle() {
                    debug!(rule_id = lane.key.0, notifier_id = lane.key.1, "Closed idle delivery lane");
                    break;
                }
                continue;
            }
        };
        let result = deliver_with_retry(&lane.config, &job.ctx, job.notifier.as_ref()).await;
        // The caller may have dropped the dispatch future.
        let _ = job.reply.send(result);
    }
}

#[instrument(skip_all, fields(rule_id = ctx.rule.id, notifier = %notifier.base().name))]
async fn deliver_with_retry(
    config: &DispatchConfig,
    ctx: &EvalContext,
    notifier: &dyn Notifier,
) -> (ChannelStatus, u32) {
    let kind = notifier.base().kind.as_str();
    let mut attempts = 0;

    let error = loop {
        if ctx.is_cancelled() {
            break NotifyError::Cancelled;
        }

        attempts += 1;
        let started = Instant::now();
        let result = attempt(config, ctx, notifier).await;
        metrics::histogram!(NOTIFICATION_DURATION, "type" => kind.to_string())
            .record(started.elapsed().as_secs_f64());

        let e = match result {
            Ok(()) => {
                metrics::counter!(NOTIFICATIONS_SENT, "type" => kind.to_string()).increment(1);
                return (ChannelStatus::Sent, attempts);
            }
            Err(e) => e,
        };

        if !e.is_retryable() || attempts > config.max_retries {
            break e;
        }

        let delay = config.backoff(attempts - 1);
        warn!(attempt = attempts, error = %e, delay_ms = delay.as_millis() as u64, "Retrying notification");
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break NotifyError::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    };

    metrics::counter!(NOTIFICATIONS_FAILED, "type" => kind.to_string()).increment(1);
    error!(attempts, error = %error, "Notification failed");
    (ChannelStatus::Failed(error), attempts)
}

/// Runs one `notify` call bounded by the attempt timeout and the context's
/// cancellation. A panicking notifier counts as a delivery failure.
async fn attempt(
    config: &DispatchConfig,
    ctx: &EvalContext,
    notifier: &dyn Notifier,
) -> Result<(), NotifyError> {
    let kind = &notifier.base().kind;
    let timeout = config.attempt_timeout();
    let call = AssertUnwindSafe(notifier.notify(ctx)).catch_unwind();

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(NotifyError::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Err(_) => Err(NotifyError::Timeout {
                channel: kind.clone(),
                after: timeout,
            }),
            Ok(Err(_)) => Err(NotifyError::delivery(kind, "notifier panicked")),
            Ok(Ok(result)) => result,
        },
    }
}
