//! Core domain types and service traits for alertrelay
//!
//! This module defines the evaluation context handed over by the rule
//! evaluation engine, and the trait contracts for the collaborators the
//! notification core consumes (webhook transport, rule link resolution).

use crate::notification::NotifyError;
use crate::webhook::{WebhookError, WebhookRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The state of an alert rule after an evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    Ok,
    Alerting,
    NoData,
    ExecutionError,
    Pending,
}

impl AlertState {
    pub const ALL: [AlertState; 5] = [
        AlertState::Ok,
        AlertState::Alerting,
        AlertState::NoData,
        AlertState::ExecutionError,
        AlertState::Pending,
    ];

    /// The wire name of the state, as used in payloads and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Ok => "ok",
            AlertState::Alerting => "alerting",
            AlertState::NoData => "no_data",
            AlertState::ExecutionError => "execution_error",
            AlertState::Pending => "pending",
        }
    }

    /// Human-readable label used in notification titles.
    pub fn text(&self) -> &'static str {
        match self {
            AlertState::Ok => "OK",
            AlertState::Alerting => "Alerting",
            AlertState::NoData => "No Data",
            AlertState::ExecutionError => "Execution Error",
            AlertState::Pending => "Pending",
        }
    }

    /// Attachment color for chat channels.
    pub fn color(&self) -> &'static str {
        match self {
            AlertState::Ok => "#36a64f",
            AlertState::Alerting | AlertState::ExecutionError => "#D63232",
            AlertState::NoData | AlertState::Pending => "#888888",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity declared on the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// Identity of the rule that produced an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    /// Slug of the dashboard the rule's panel lives on.
    #[serde(default)]
    pub dashboard_slug: Option<String>,
    #[serde(default)]
    pub panel_id: Option<i64>,
    #[serde(default = "default_org_id")]
    pub org_id: i64,
    /// Ids of the notifiers explicitly attached to this rule.
    #[serde(default)]
    pub notifier_ids: Vec<i64>,
}

fn default_org_id() -> i64 {
    1
}

impl Default for RuleRef {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            message: String::new(),
            severity: Severity::default(),
            dashboard_slug: None,
            panel_id: None,
            org_id: default_org_id(),
            notifier_ids: Vec::new(),
        }
    }
}

/// A single series that matched the rule condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EvalMatch {
    pub metric: String,
    /// `None` when the series produced a null value.
    pub value: Option<f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl EvalMatch {
    /// A match with a value and no tags.
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value: Some(value),
            tags: BTreeMap::new(),
        }
    }
}

/// The serializable part of an evaluation, as emitted by the evaluation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalEvent {
    pub rule: RuleRef,
    pub state: AlertState,
    #[serde(default)]
    pub previous_state: AlertState,
    #[serde(default)]
    pub matches: Vec<EvalMatch>,
    #[serde(default)]
    pub image_public_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub start_time: DateTime<Utc>,
}

/// Everything a notifier needs to know about one evaluation cycle of one rule.
///
/// Built fresh per cycle and shared read-only (behind an `Arc`) by every
/// channel the rule is attached to.
#[derive(Clone)]
pub struct EvalContext {
    pub rule: RuleRef,
    pub state: AlertState,
    pub previous_state: AlertState,
    pub matches: Vec<EvalMatch>,
    pub image_public_url: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Cancelled when the cycle is superseded or the rule goes away.
    pub cancel: CancellationToken,
    pub url_resolver: Option<Arc<dyn RuleUrlResolver>>,
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("rule", &self.rule)
            .field("state", &self.state)
            .field("previous_state", &self.previous_state)
            .field("matches", &self.matches.len())
            .field("image_public_url", &self.image_public_url)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl EvalContext {
    /// Creates a context for `rule` in `state` with no evidence attached.
    pub fn new(rule: RuleRef, state: AlertState) -> Self {
        Self {
            rule,
            state,
            previous_state: AlertState::Ok,
            matches: Vec::new(),
            image_public_url: None,
            start_time: Utc::now(),
            cancel: CancellationToken::new(),
            url_resolver: None,
        }
    }

    /// Builds a context from a wire event. An empty image URL counts as none.
    ///
    /// The context gets its own cancellation token and no URL resolver;
    /// attach them with `with_cancel` and `with_url_resolver`.
    pub fn from_event(event: EvalEvent) -> Self {
        Self {
            rule: event.rule,
            state: event.state,
            previous_state: event.previous_state,
            matches: event.matches,
            image_public_url: event.image_public_url.filter(|url| !url.is_empty()),
            start_time: event.start_time,
            cancel: CancellationToken::new(),
            url_resolver: None,
        }
    }

    pub fn with_previous_state(mut self, previous: AlertState) -> Self {
        self.previous_state = previous;
        self
    }

    pub fn with_matches(mut self, matches: Vec<EvalMatch>) -> Self {
        self.matches = matches;
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_public_url = Some(url.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_url_resolver(mut self, resolver: Arc<dyn RuleUrlResolver>) -> Self {
        self.url_resolver = Some(resolver);
        self
    }

    /// Resolves the public link back to the rule.
    pub fn rule_url(&self) -> Result<String, NotifyError> {
        match &self.url_resolver {
            Some(resolver) => resolver.rule_url(&self.rule),
            None => Err(NotifyError::LinkResolution(
                "no rule url resolver configured".to_string(),
            )),
        }
    }

    /// Title used by chat-style channels, e.g. `[Alerting] High CPU`.
    pub fn notification_title(&self) -> String {
        format!("[{}] {}", self.state.text(), self.rule.name)
    }

    /// The rule message with `${severity}`, `${state}`, `${metric}` and
    /// `${value}` substituted. Metric and value come from the first match.
    pub fn templated_message(&self) -> String {
        let first = self.matches.first();
        let metric = first.map(|m| m.metric.as_str()).unwrap_or("");
        let value = first
            .and_then(|m| m.value)
            .map(|v| format!("{:.2}", v))
            .unwrap_or_default();

        self.rule
            .message
            .replace("${severity}", self.rule.severity.as_str())
            .replace("${state}", self.state.text())
            .replace("${metric}", metric)
            .replace("${value}", &value)
    }

    /// Whether delivery for this evaluation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Performs outbound webhook calls on behalf of notification channels.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Sends `request` and waits for the response.
    ///
    /// Implementations must abort the in-flight request once `cancel` fires
    /// and return `WebhookError::Cancelled`.
    async fn send(
        &self,
        cancel: &CancellationToken,
        request: WebhookRequest,
    ) -> Result<(), WebhookError>;
}

/// Resolves the public URL a notification should link back to.
pub trait RuleUrlResolver: Send + Sync {
    fn rule_url(&self, rule: &RuleRef) -> Result<String, NotifyError>;
}
