//! Built-in notification channels.
//!
//! The set of channels compiled into the binary is closed and listed by
//! `ChannelKind`. Other kinds can still be added to a `NotifierRegistry` at
//! runtime through their own descriptors.

pub mod pagerduty;
pub mod slack;
pub mod webhook;

use crate::core::{EvalContext, EvalMatch, WebhookSender};
use crate::notification::registry::NotifierDescriptor;
use crate::notification::NotifyError;
use crate::webhook::{truncate_body, WebhookError, WebhookRequest};
use tracing::error;

/// Most evaluation matches rendered into a single notification.
pub const MAX_RENDERED_MATCHES: usize = 10;
/// Longest metric name rendered into a notification.
pub const MAX_METRIC_NAME_LEN: usize = 200;
/// Longest request body included in failure logs.
pub const MAX_LOGGED_BODY_LEN: usize = 1024;

/// The channel kinds built into this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    PagerDuty,
    Slack,
    Webhook,
}

impl ChannelKind {
    /// Every built-in channel, in registration order.
    pub const ALL: [ChannelKind; 3] = [ChannelKind::PagerDuty, ChannelKind::Slack, ChannelKind::Webhook];

    /// The type name configs use to select this channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::PagerDuty => pagerduty::KIND,
            ChannelKind::Slack => slack::KIND,
            ChannelKind::Webhook => webhook::KIND,
        }
    }

    /// The registry descriptor for this channel.
    pub fn descriptor(&self) -> NotifierDescriptor {
        match self {
            ChannelKind::PagerDuty => pagerduty::descriptor(),
            ChannelKind::Slack => slack::descriptor(),
            ChannelKind::Webhook => webhook::descriptor(),
        }
    }
}

/// Splits `matches` into the slice that gets rendered and the number left out.
pub(crate) fn capped_matches(matches: &[EvalMatch]) -> (&[EvalMatch], usize) {
    let shown = matches.len().min(MAX_RENDERED_MATCHES);
    (&matches[..shown], matches.len() - shown)
}

pub(crate) fn metric_label(metric: &str) -> &str {
    truncate_body(metric, MAX_METRIC_NAME_LEN)
}

/// Formats a match value with two decimals, `null` when absent.
pub(crate) fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "null".to_string(),
    }
}

/// Hands a rendered request to the webhook transport and maps the outcome.
///
/// Failures are logged with the (truncated) body so they can be diagnosed
/// without reproducing the evaluation.
pub(crate) async fn deliver(
    sender: &dyn WebhookSender,
    ctx: &EvalContext,
    channel: &str,
    event_type: &str,
    request: WebhookRequest,
) -> Result<(), NotifyError> {
    let body = request.body.clone();
    match sender.send(&ctx.cancel, request).await {
        Ok(()) => Ok(()),
        Err(WebhookError::Cancelled) => Err(NotifyError::Cancelled),
        Err(e) => {
            error!(
                channel,
                event_type,
                rule_id = ctx.rule.id,
                error = %e,
                body = truncate_body(&body, MAX_LOGGED_BODY_LEN),
                "Failed to send notification"
            );
            Err(NotifyError::delivery(channel, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_matches() {
        let matches: Vec<_> = (0..25).map(|i| EvalMatch::new(format!("m{}", i), i as f64)).collect();

        let (shown, hidden) = capped_matches(&matches);
        assert_eq!(shown.len(), MAX_RENDERED_MATCHES);
        assert_eq!(hidden, 15);

        let (shown, hidden) = capped_matches(&matches[..3]);
        assert_eq!(shown.len(), 3);
        assert_eq!(hidden, 0);

        let (shown, hidden) = capped_matches(&[]);
        assert!(shown.is_empty());
        assert_eq!(hidden, 0);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(Some(95.0)), "95.00");
        assert_eq!(format_value(Some(88.456)), "88.46");
        assert_eq!(format_value(None), "null");
    }

    #[test]
    fn test_kind_names_match_descriptors() {
        for kind in ChannelKind::ALL {
            assert_eq!(kind.descriptor().kind, kind.as_str());
        }
    }
}
