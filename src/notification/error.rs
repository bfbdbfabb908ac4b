//! Error types for the notification core.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or running a notifier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    /// Bad or missing settings when constructing a notifier.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    #[error("unknown channel type: {0}")]
    UnknownChannelType(String),

    #[error("channel type already registered: {0}")]
    DuplicateChannelType(String),

    /// The link back to the rule could not be resolved.
    #[error("failed to resolve rule link: {0}")]
    LinkResolution(String),

    /// The transport failed to deliver the rendered notification.
    #[error("delivery to {channel} failed: {cause}")]
    Delivery { channel: String, cause: String },

    #[error("delivery to {channel} timed out after {after:?}")]
    Timeout { channel: String, after: Duration },

    #[error("notification cancelled")]
    Cancelled,
}

impl NotifyError {
    /// Shorthand for `NotifyError::Validation`.
    pub fn validation(reason: impl Into<String>) -> Self {
        NotifyError::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for `NotifyError::Delivery`.
    pub fn delivery(channel: impl Into<String>, cause: impl ToString) -> Self {
        NotifyError::Delivery {
            channel: channel.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether the dispatcher may try the same delivery again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Delivery { .. } | NotifyError::Timeout { .. })
    }
}
