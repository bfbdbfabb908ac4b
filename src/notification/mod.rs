//! Delivers rule state changes to notification channels.
//!
//! This module defines the `Notifier` contract every channel implements, the
//! registry that turns persisted notifier configs into running channels, the
//! in-memory binding of notifiers to rules, and the `Dispatcher` that fans an
//! evaluation out to every attached channel.
//!
//! ## Components:
//!
//! - **`NotifierRegistry`**: maps channel type names to descriptors and builds
//!   notifiers from their configs.
//! - **`NotifierBase`**: the shared fields composed into each channel.
//! - **`NotifierBindings`**: the notifiers currently built, and which of them
//!   a rule is attached to.
//! - **`Dispatcher`**: runs `should_notify` and `notify` for every attached
//!   channel, isolates failures, and retries transport errors with backoff.

pub mod base;
pub mod bindings;
pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod settings;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::core::EvalContext;
use async_trait::async_trait;

pub use base::{NotifierBase, NotifierConfig, SendOn, SkipReason};
pub use bindings::{BuildFailure, NotifierBindings};
pub use channels::ChannelKind;
pub use dispatcher::{
    ChannelOutcome, ChannelStatus, DeliveryPolicy, DispatchConfig, DispatchError, DispatchReport,
    Dispatcher,
};
pub use error::NotifyError;
pub use registry::{ChannelServices, NotifierDescriptor, NotifierRegistry};
pub use settings::{OptionKind, OptionSpec, Settings};

/// A notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn base(&self) -> &NotifierBase;

    /// Returns why this evaluation must not be sent, or `None` to send it.
    fn skip_reason(&self, ctx: &EvalContext) -> Option<SkipReason> {
        self.base().skip_reason(ctx.state, ctx.previous_state)
    }

    fn should_notify(&self, ctx: &EvalContext) -> bool {
        self.skip_reason(ctx).is_none()
    }

    /// Renders and delivers a notification for `ctx`.
    ///
    /// Implementations perform a single delivery attempt. Retries are the
    /// dispatcher's decision.
    async fn notify(&self, ctx: &EvalContext) -> Result<(), NotifyError>;
}
