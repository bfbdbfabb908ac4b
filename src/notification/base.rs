//! State shared by every notification channel.

use crate::core::AlertState;
use crate::notification::settings::Settings;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A persisted notifier definition, as stored by the settings backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub id: i64,
    pub name: String,
    /// The channel type name, e.g. `pagerduty`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Default notifiers are attached to every rule.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub send_on: SendOn,
}

/// Per-state send flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOn {
    #[serde(default = "enabled")]
    pub no_data: bool,
    #[serde(default = "enabled")]
    pub execution_error: bool,
}

fn enabled() -> bool {
    true
}

impl Default for SendOn {
    fn default() -> Self {
        Self {
            no_data: true,
            execution_error: true,
        }
    }
}

/// Why a notifier chose not to send for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already notified for this state in the previous cycle.
    UnchangedState,
    Pending,
    NoDataDisabled,
    ExecutionErrorDisabled,
    /// The rule resolved and the channel does not auto-resolve.
    AutoResolveDisabled,
}

impl SkipReason {
    /// Stable snake_case name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnchangedState => "unchanged_state",
            SkipReason::Pending => "pending",
            SkipReason::NoDataDisabled => "no_data_disabled",
            SkipReason::ExecutionErrorDisabled => "execution_error_disabled",
            SkipReason::AutoResolveDisabled => "auto_resolve_disabled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields every channel carries, composed into each implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierBase {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub is_default: bool,
    pub settings: Settings,
    pub send_on: SendOn,
    /// Whether the channel is told when the rule returns to OK.
    pub auto_resolve: bool,
}

impl NotifierBase {
    /// Copies the shared fields out of `config`.
    ///
    /// `auto_resolve` is decided by each channel, since only some of them
    /// make it configurable.
    pub fn new(config: &NotifierConfig, auto_resolve: bool) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            kind: config.kind.clone(),
            is_default: config.is_default,
            settings: config.settings.clone(),
            send_on: config.send_on,
            auto_resolve,
        }
    }

    /// Returns why a transition from `previous` to `state` should not be
    /// sent, or `None` if it should.
    pub fn skip_reason(&self, state: AlertState, previous: AlertState) -> Option<SkipReason> {
        if state == previous {
            return Some(SkipReason::UnchangedState);
        }
        match state {
            AlertState::Pending => Some(SkipReason::Pending),
            AlertState::NoData if !self.send_on.no_data => Some(SkipReason::NoDataDisabled),
            AlertState::ExecutionError if !self.send_on.execution_error => {
                Some(SkipReason::ExecutionErrorDisabled)
            }
            AlertState::Ok if !self.auto_resolve => Some(SkipReason::AutoResolveDisabled),
            _ => None,
        }
    }

    /// True when the transition should be sent.
    pub fn should_notify(&self, state: AlertState, previous: AlertState) -> bool {
        self.skip_reason(state, previous).is_none()
    }
}
