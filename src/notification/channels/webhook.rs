//! Generic JSON webhook channel.

use crate::core::{EvalContext, WebhookSender};
use crate::notification::base::{NotifierBase, NotifierConfig};
use crate::notification::channels::{capped_matches, deliver, metric_label};
use crate::notification::registry::{ChannelServices, NotifierDescriptor};
use crate::notification::settings::{OptionKind, OptionSpec};
use crate::notification::{Notifier, NotifyError};
use crate::webhook::{HttpMethod, WebhookRequest};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Type name of the generic webhook channel.
pub const KIND: &str = "webhook";

/// Registry entry for the generic webhook channel.
pub fn descriptor() -> NotifierDescriptor {
    NotifierDescriptor::new(
        KIND,
        "Webhook",
        "Sends a JSON document describing the alert to any HTTP endpoint",
        |config, services| {
            Ok(Arc::new(WebhookNotifier::from_config(config, services)?) as Arc<dyn Notifier>)
        },
    )
    .with_options(vec![
        OptionSpec::required("url", OptionKind::Url),
        OptionSpec::optional("httpMethod", OptionKind::String, Some(json!("POST"))),
        OptionSpec::optional("username", OptionKind::String, None),
        OptionSpec::optional("password", OptionKind::String, None),
    ])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    title: String,
    rule_id: i64,
    rule_name: &'a str,
    state: &'static str,
    message: String,
    eval_matches: Vec<PayloadMatch<'a>>,
    #[serde(skip_serializing_if = "is_zero")]
    omitted_matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PayloadMatch<'a> {
    metric: &'a str,
    value: Option<f64>,
    tags: &'a BTreeMap<String, String>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Sends the alert as JSON to an arbitrary HTTP endpoint.
pub struct WebhookNotifier {
    base: NotifierBase,
    url: String,
    method: HttpMethod,
    basic_auth: Option<(String, String)>,
    sender: Arc<dyn WebhookSender>,
}

impl WebhookNotifier {
    /// Reads `url`, `httpMethod`, `username` and `password` from the settings.
    ///
    /// Basic auth is used only when a username is set.
    pub fn from_config(
        config: &NotifierConfig,
        services: &ChannelServices,
    ) -> Result<Self, NotifyError> {
        let settings = &config.settings;
        let method = match settings.get_string("httpMethod")? {
            None => HttpMethod::Post,
            Some(m) => match m.to_ascii_uppercase().as_str() {
                "POST" => HttpMethod::Post,
                "PUT" => HttpMethod::Put,
                other => {
                    return Err(NotifyError::validation(format!(
                        "unsupported httpMethod `{}`",
                        other
                    )))
                }
            },
        };
        let basic_auth = settings
            .get_string("username")?
            .map(|user| -> Result<_, NotifyError> {
                Ok((user, settings.get_string("password")?.unwrap_or_default()))
            })
            .transpose()?;

        Ok(Self {
            base: NotifierBase::new(config, true),
            url: settings.require_url("url")?,
            method,
            basic_auth,
            sender: services.webhook.clone(),
        })
    }

    fn render(&self, ctx: &EvalContext) -> Result<String, NotifyError> {
        let (shown, hidden) = capped_matches(&ctx.matches);
        let payload = WebhookPayload {
            title: ctx.notification_title(),
            rule_id: ctx.rule.id,
            rule_name: &ctx.rule.name,
            state: ctx.state.as_str(),
            message: ctx.templated_message(),
            eval_matches: shown
                .iter()
                .map(|m| PayloadMatch {
                    metric: metric_label(&m.metric),
                    value: m.value,
                    tags: &m.tags,
                })
                .collect(),
            omitted_matches: hidden,
            rule_url: ctx.rule_url().ok(),
            image_url: ctx.image_public_url.as_deref(),
        };
        serde_json::to_string(&payload).map_err(|e| NotifyError::delivery(KIND, e))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    #[instrument(skip_all, fields(notifier = %self.base.name, rule_id = ctx.rule.id))]
    async fn notify(&self, ctx: &EvalContext) -> Result<(), NotifyError> {
        info!(state = %ctx.state, method = self.method.as_str(), "Notifying webhook");

        let request = WebhookRequest {
            method: self.method,
            url: self.url.clone(),
            body: self.render(ctx)?,
            content_type: "application/json".to_string(),
            basic_auth: self.basic_auth.clone(),
        };
        deliver(self.sender.as_ref(), ctx, KIND, ctx.state.as_str(), request).await
    }
}
