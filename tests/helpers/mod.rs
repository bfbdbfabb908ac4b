#![allow(dead_code)]

pub mod app;
pub mod test_metrics;

use alertrelay::core::{AlertState, EvalEvent, EvalMatch, RuleRef};
use alertrelay::notification::{NotifierConfig, Settings};
use serde_json::Value;

/// Builds a notifier config from a JSON settings object.
pub fn notifier_config(id: i64, kind: &str, settings: Value) -> NotifierConfig {
    NotifierConfig {
        id,
        name: format!("{}-{}", kind, id),
        kind: kind.to_string(),
        is_default: false,
        settings: serde_json::from_value::<Settings>(settings).expect("settings must be an object"),
        send_on: Default::default(),
    }
}

/// A rule with a dashboard link, attached to `notifier_ids`.
pub fn rule(id: i64, name: &str, message: &str, notifier_ids: Vec<i64>) -> RuleRef {
    RuleRef {
        id,
        name: name.to_string(),
        message: message.to_string(),
        dashboard_slug: Some("ops".to_string()),
        panel_id: Some(2),
        org_id: 1,
        notifier_ids,
        ..Default::default()
    }
}

pub fn event(rule: RuleRef, state: AlertState, previous: AlertState, matches: Vec<EvalMatch>) -> EvalEvent {
    EvalEvent {
        rule,
        state,
        previous_state: previous,
        matches,
        image_public_url: None,
        start_time: chrono::Utc::now(),
    }
}
