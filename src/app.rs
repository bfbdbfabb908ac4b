//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::{AlertState, EvalContext, EvalEvent, EvalMatch, RuleRef, RuleUrlResolver, WebhookSender},
    internal_metrics::MetricsBuilder,
    links::AppUrlResolver,
    notification::{
        BuildFailure, ChannelOutcome, ChannelServices, DispatchError, DispatchReport, Dispatcher,
        NotifierBindings, NotifierDescriptor, NotifierRegistry,
    },
    task_manager::TaskManager,
    webhook::HttpWebhookSender,
};
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Totals for one run of the stdin relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub events: usize,
    /// Lines that could not be parsed as an evaluation event.
    pub invalid: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Dispatches that returned an error under the configured policy.
    pub dispatch_errors: usize,
}

impl RelaySummary {
    fn record(&mut self, report: &DispatchReport) {
        self.sent += report.sent();
        self.skipped += report.skipped();
        self.failed += report.failed();
    }
}

/// A fully wired notification pipeline.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: Option<SocketAddr>,
    bindings: Arc<NotifierBindings>,
    dispatcher: Dispatcher,
    url_resolver: Arc<dyn RuleUrlResolver>,
    cancel: CancellationToken,
    build_failures: Vec<BuildFailure>,
}

impl App {
    /// Starts building an `App` from `config`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// Address the metrics server is bound to, if it is enabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn bindings(&self) -> &Arc<NotifierBindings> {
        &self.bindings
    }

    /// The dispatcher every event goes through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Notifier configs that were left out because they failed to build.
    pub fn build_failures(&self) -> &[BuildFailure] {
        &self.build_failures
    }

    /// Turns an incoming event into a context wired to this app's link
    /// resolver and cancellation.
    pub fn context(&self, event: EvalEvent) -> Arc<EvalContext> {
        Arc::new(
            EvalContext::from_event(event)
                .with_url_resolver(self.url_resolver.clone())
                .with_cancel(self.cancel.child_token()),
        )
    }

    /// Cancels every delivery started through `context`.
    pub fn cancel_in_flight(&self) {
        self.cancel.cancel();
    }

    /// Reads newline-delimited JSON events from `reader` and dispatches each
    /// one until the input ends or shutdown is signalled.
    ///
    /// Events are dispatched in the order they are read; the relay does not
    /// wait for one event's deliveries before reading the next. On shutdown,
    /// in-flight deliveries are cancelled. Lines that are not UTF-8 or not a
    /// valid event are counted in `invalid` and skipped.
    #[instrument(skip_all)]
    pub async fn relay<R>(&self, mut reader: R) -> Result<RelaySummary>
    where
        R: AsyncBufRead + Unpin,
    {
        // Partial reads survive a cancelled `read_until`, so the buffer lives
        // across loop iterations.
        let mut buf = Vec::new();
        let mut shutdown_rx = self.task_manager.shutdown_rx();
        let mut pending: JoinSet<Result<DispatchReport, DispatchError>> = JoinSet::new();
        let mut summary = RelaySummary::default();
        let mut line_number = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!(in_flight = pending.len(), "Relay received shutdown signal, cancelling deliveries");
                    self.cancel_in_flight();
                    break;
                }
                Some(joined) = pending.join_next(), if !pending.is_empty() => {
                    record_dispatch(&mut summary, joined);
                }
                read = reader.read_until(b'\n', &mut buf) => {
                    if read.context("Failed to read evaluation events")? == 0 {
                        debug!("Relay input finished");
                        break;
                    }
                    line_number += 1;
                    let line = match String::from_utf8(std::mem::take(&mut buf)) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(line = line_number, error = %e, "Ignoring evaluation event that is not valid UTF-8");
                            summary.invalid += 1;
                            continue;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let event: EvalEvent = match serde_json::from_str(&line) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(line = line_number, error = %e, "Ignoring invalid evaluation event");
                            summary.invalid += 1;
                            continue;
                        }
                    };
                    summary.events += 1;
                    debug!(rule_id = event.rule.id, state = %event.state, "Relaying evaluation");
                    pending.spawn(self.dispatcher.dispatch_rule(self.context(event), &self.bindings));
                }
            }
        }

        while let Some(joined) = pending.join_next().await {
            record_dispatch(&mut summary, joined);
        }

        info!(
            events = summary.events,
            invalid = summary.invalid,
            sent = summary.sent,
            skipped = summary.skipped,
            failed = summary.failed,
            "Relay finished"
        );
        Ok(summary)
    }

    /// Sends a synthetic alerting notification through notifier `id`.
    ///
    /// The notifier's send policy still applies, but a fresh alert always
    /// passes it.
    pub async fn send_test_notification(&self, id: i64) -> Result<ChannelOutcome> {
        let notifier = match self.bindings.get(id) {
            Some(notifier) => notifier,
            None => {
                return Err(match self.build_failures.iter().find(|f| f.id == id) {
                    Some(failure) => anyhow!("Notifier {} could not be built: {}", id, failure.error),
                    None => anyhow!("No notifier with id {}", id),
                })
            }
        };

        let event = EvalEvent {
            rule: test_rule(),
            state: AlertState::Alerting,
            previous_state: AlertState::Ok,
            matches: vec![
                EvalMatch::new("High value", 100.0),
                EvalMatch::new("Higher Value", 200.0),
            ],
            image_public_url: None,
            start_time: chrono::Utc::now(),
        };
        info!(id, name = %notifier.base().name, "Sending test notification");

        let report = match self.dispatcher.dispatch(self.context(event), &[notifier]).await {
            Ok(report) => report,
            Err(e) => e.report().clone(),
        };
        report
            .outcomes
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Test dispatch produced no outcome"))
    }

    /// Waits for the background tasks to finish after shutdown was signalled.
    pub async fn shutdown(self) {
        self.task_manager.shutdown().await;
    }
}

fn test_rule() -> RuleRef {
    RuleRef {
        id: 0,
        name: "Test notification".to_string(),
        message: "Someone is testing the alert notification.".to_string(),
        dashboard_slug: Some("alertrelay-test".to_string()),
        panel_id: Some(1),
        ..Default::default()
    }
}

fn record_dispatch(
    summary: &mut RelaySummary,
    joined: Result<Result<DispatchReport, DispatchError>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(report)) => summary.record(&report),
        Ok(Err(e)) => {
            warn!(error = %e, "Dispatch failed");
            summary.record(e.report());
            summary.dispatch_errors += 1;
        }
        Err(e) => error!(error = %e, "Dispatch task failed"),
    }
}

/// Builder for the application.
///
/// Components can be overridden for testing.
pub struct AppBuilder {
    config: Config,
    webhook_override: Option<Arc<dyn WebhookSender>>,
    extra_descriptors: Vec<NotifierDescriptor>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            webhook_override: None,
            extra_descriptors: Vec::new(),
        }
    }

    /// Overrides the outbound HTTP transport.
    pub fn webhook_override(mut self, sender: Arc<dyn WebhookSender>) -> Self {
        self.webhook_override = Some(sender);
        self
    }

    /// Registers an additional channel type next to the built-in ones.
    pub fn register_channel(mut self, descriptor: NotifierDescriptor) -> Self {
        self.extra_descriptors.push(descriptor);
        self
    }

    /// Builds every component. Must be called from within a Tokio runtime.
    #[instrument(skip_all)]
    pub fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx.clone());

        let metrics_addr = match MetricsBuilder::new(config.metrics.clone()).build(shutdown_rx)? {
            Some((server, addr)) => {
                task_manager.spawn("MetricsServer", server.run());
                info!(%addr, "Serving metrics");
                Some(addr)
            }
            None => None,
        };

        let webhook = match self.webhook_override {
            Some(sender) => sender,
            None => Arc::new(
                HttpWebhookSender::new(&config.webhook).context("Failed to build HTTP client")?,
            ) as Arc<dyn WebhookSender>,
        };

        let mut registry = NotifierRegistry::with_builtin_channels(ChannelServices::new(webhook));
        for descriptor in self.extra_descriptors {
            registry
                .try_register(descriptor)
                .context("Failed to register channel type")?;
        }

        let bindings = Arc::new(NotifierBindings::new(Arc::new(registry)));
        let build_failures = bindings.load(&config.notifiers);
        for failure in &build_failures {
            error!(
                id = failure.id,
                name = %failure.name,
                kind = %failure.kind,
                error = %failure.error,
                "Notifier could not be built"
            );
        }

        info!(notifiers = bindings.len(), "alertrelay initialized");

        Ok(App {
            task_manager,
            metrics_addr,
            bindings,
            dispatcher: Dispatcher::new(config.dispatch.clone()),
            url_resolver: Arc::new(AppUrlResolver::new(config.app_url.clone())),
            cancel: CancellationToken::new(),
            build_failures,
        })
    }
}
