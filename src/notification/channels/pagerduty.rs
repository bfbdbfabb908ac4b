//! PagerDuty events API channel.

use crate::core::{AlertState, EvalContext, EvalMatch, WebhookSender};
use crate::notification::base::{NotifierBase, NotifierConfig};
use crate::notification::channels::{capped_matches, deliver, format_value, metric_label};
use crate::notification::registry::{ChannelServices, NotifierDescriptor};
use crate::notification::settings::{OptionKind, OptionSpec};
use crate::notification::{Notifier, NotifyError};
use crate::webhook::WebhookRequest;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Type name of the PagerDuty channel.
pub const KIND: &str = "pagerduty";
/// Events API endpoint used unless the `url` setting overrides it.
pub const DEFAULT_EVENTS_API_URL: &str =
    "https://events.pagerduty.com/generic/2010-04-15/create_event.json";
/// Value of the `client` field on every event.
pub const CLIENT_NAME: &str = "alertrelay";

/// Registry entry for the PagerDuty channel.
pub fn descriptor() -> NotifierDescriptor {
    NotifierDescriptor::new(
        KIND,
        "PagerDuty",
        "Sends notifications to PagerDuty",
        |config, services| {
            Ok(Arc::new(PagerDutyNotifier::from_config(config, services)?) as Arc<dyn Notifier>)
        },
    )
    .with_options(vec![
        OptionSpec::required("integrationKey", OptionKind::String),
        OptionSpec::optional("autoResolve", OptionKind::Bool, Some(json!(true))),
        OptionSpec::optional("url", OptionKind::Url, Some(json!(DEFAULT_EVENTS_API_URL))),
    ])
}

/// `resolve` when the rule is back to OK, `trigger` for every other state.
pub fn event_type(state: AlertState) -> &'static str {
    match state {
        AlertState::Ok => "resolve",
        _ => "trigger",
    }
}

/// Correlates the trigger and resolve events of one rule.
pub fn incident_key(rule_id: i64) -> String {
    format!("alertId-{}", rule_id)
}

/// Renders `"<name> - <message>"` followed by up to `MAX_RENDERED_MATCHES`
/// `" - <metric> : <value>"` entries and a `" (+N more)"` suffix.
pub fn render_description(rule_name: &str, message: &str, matches: &[EvalMatch]) -> String {
    let mut description = format!("{} - {}", rule_name, message);
    let (shown, hidden) = capped_matches(matches);
    for m in shown {
        let _ = write!(
            description,
            " - {} : {}",
            metric_label(&m.metric),
            format_value(m.value)
        );
    }
    if hidden > 0 {
        let _ = write!(description, " (+{} more)", hidden);
    }
    description
}

#[derive(Debug, Serialize)]
struct PagerDutyEvent<'a> {
    service_key: &'a str,
    description: String,
    client: &'static str,
    event_type: &'static str,
    incident_key: String,
    client_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    contexts: Vec<PagerDutyContext<'a>>,
}

#[derive(Debug, Serialize)]
struct PagerDutyContext<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    src: &'a str,
}

/// Sends trigger and resolve events to the PagerDuty Events API.
pub struct PagerDutyNotifier {
    base: NotifierBase,
    integration_key: String,
    events_url: String,
    sender: Arc<dyn WebhookSender>,
}

impl PagerDutyNotifier {
    /// Reads `integrationKey`, `autoResolve` and `url` from the settings.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Validation` when the integration key is missing
    /// or a setting has the wrong type.
    pub fn from_config(
        config: &NotifierConfig,
        services: &ChannelServices,
    ) -> Result<Self, NotifyError> {
        let integration_key = config.settings.require_string("integrationKey")?;
        let auto_resolve = config.settings.get_bool("autoResolve", true)?;
        let events_url = config
            .settings
            .get_url("url")?
            .unwrap_or_else(|| DEFAULT_EVENTS_API_URL.to_string());

        Ok(Self {
            base: NotifierBase::new(config, auto_resolve),
            integration_key,
            events_url,
            sender: services.webhook.clone(),
        })
    }

    fn render(&self, ctx: &EvalContext, client_url: String) -> Result<String, NotifyError> {
        let contexts = ctx
            .image_public_url
            .as_deref()
            .map(|src| vec![PagerDutyContext { kind: "image", src }])
            .unwrap_or_default();

        let event = PagerDutyEvent {
            service_key: &self.integration_key,
            description: render_description(&ctx.rule.name, &ctx.templated_message(), &ctx.matches),
            client: CLIENT_NAME,
            event_type: event_type(ctx.state),
            incident_key: incident_key(ctx.rule.id),
            client_url,
            contexts,
        };
        serde_json::to_string(&event).map_err(|e| NotifyError::delivery(KIND, e))
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    #[instrument(skip_all, fields(notifier = %self.base.name, rule_id = ctx.rule.id))]
    async fn notify(&self, ctx: &EvalContext) -> Result<(), NotifyError> {
        let event_type = event_type(ctx.state);
        info!(event_type, "Notifying PagerDuty");

        let client_url = ctx.rule_url().map_err(|e| {
            error!(error = %e, "Failed to get rule link");
            e
        })?;
        let body = self.render(ctx, client_url)?;

        deliver(
            self.sender.as_ref(),
            ctx,
            KIND,
            event_type,
            WebhookRequest::post_json(self.events_url.clone(), body),
        )
        .await
    }
}
