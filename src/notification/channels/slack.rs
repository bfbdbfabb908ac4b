//! Slack incoming-webhook channel.

use crate::core::{AlertState, EvalContext, WebhookSender};
use crate::notification::base::{NotifierBase, NotifierConfig};
use crate::notification::channels::{capped_matches, deliver, format_value, metric_label};
use crate::notification::registry::{ChannelServices, NotifierDescriptor};
use crate::notification::settings::{OptionKind, OptionSpec};
use crate::notification::{Notifier, NotifyError};
use crate::webhook::WebhookRequest;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Type name of the Slack channel.
pub const KIND: &str = "slack";

/// Registry entry for the Slack channel.
pub fn descriptor() -> NotifierDescriptor {
    NotifierDescriptor::new(
        KIND,
        "Slack",
        "Sends notifications to a Slack incoming webhook",
        |config, services| {
            Ok(Arc::new(SlackNotifier::from_config(config, services)?) as Arc<dyn Notifier>)
        },
    )
    .with_options(vec![
        OptionSpec::required("url", OptionKind::Url),
        OptionSpec::optional("recipient", OptionKind::String, None),
        OptionSpec::optional("mention", OptionKind::String, None),
    ])
}

/// Posts an attachment to a Slack incoming webhook.
pub struct SlackNotifier {
    base: NotifierBase,
    url: String,
    recipient: Option<String>,
    mention: Option<String>,
    sender: Arc<dyn WebhookSender>,
}

impl SlackNotifier {
    /// Reads `url`, `recipient` and `mention` from the settings.
    pub fn from_config(
        config: &NotifierConfig,
        services: &ChannelServices,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            base: NotifierBase::new(config, true),
            url: config.settings.require_url("url")?,
            recipient: config.settings.get_string("recipient")?,
            mention: config.settings.get_string("mention")?,
            sender: services.webhook.clone(),
        })
    }

    /// Builds the Slack message. The rule link is optional for this channel.
    fn render(&self, ctx: &EvalContext, rule_url: Option<String>) -> Value {
        let (shown, hidden) = capped_matches(&ctx.matches);
        let mut fields: Vec<Value> = shown
            .iter()
            .map(|m| {
                json!({
                    "title": metric_label(&m.metric),
                    "value": format_value(m.value),
                    "short": true,
                })
            })
            .collect();
        if hidden > 0 {
            fields.push(json!({
                "title": "More",
                "value": format!("+{} more", hidden),
                "short": true,
            }));
        }

        let mut text = ctx.templated_message();
        if let Some(mention) = &self.mention {
            if ctx.state != AlertState::Ok {
                text = format!("{} {}", mention, text);
            }
        }

        let mut attachment = json!({
            "color": ctx.state.color(),
            "title": ctx.notification_title(),
            "text": text,
            "fields": fields,
            "footer": "alertrelay",
            "ts": ctx.start_time.timestamp(),
        });
        if let Some(url) = rule_url {
            attachment["title_link"] = json!(url);
        }
        if let Some(image) = &ctx.image_public_url {
            attachment["image_url"] = json!(image);
        }

        let mut body = json!({ "attachments": [attachment] });
        if let Some(recipient) = &self.recipient {
            body["channel"] = json!(recipient);
        }
        body
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    #[instrument(skip_all, fields(notifier = %self.base.name, rule_id = ctx.rule.id))]
    async fn notify(&self, ctx: &EvalContext) -> Result<(), NotifyError> {
        info!(state = %ctx.state, "Notifying Slack");

        let rule_url = match ctx.rule_url() {
            Ok(url) => Some(url),
            Err(e) => {
                debug!(error = %e, "Sending Slack message without rule link");
                None
            }
        };
        let body = self.render(ctx, rule_url).to_string();

        deliver(
            self.sender.as_ref(),
            ctx,
            KIND,
            ctx.state.as_str(),
            WebhookRequest::post_json(self.url.clone(), body),
        )
        .await
    }
}
