//! The registry of notification channel types.
//!
//! A registry is an explicit value assembled at startup: the built-in
//! channels are registered by `with_builtin_channels`, and extra kinds can be
//! added with `register` before the registry is shared. After that it is
//! only read, so it can be wrapped in an `Arc` and consulted from any number
//! of evaluation workers.

use crate::core::WebhookSender;
use crate::notification::base::NotifierConfig;
use crate::notification::channels::ChannelKind;
use crate::notification::settings::OptionSpec;
use crate::notification::{Notifier, NotifyError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Capabilities handed to channel factories.
#[derive(Clone)]
pub struct ChannelServices {
    pub webhook: Arc<dyn WebhookSender>,
}

impl ChannelServices {
    /// Creates the services with the given outbound webhook transport.
    pub fn new(webhook: Arc<dyn WebhookSender>) -> Self {
        Self { webhook }
    }
}

impl fmt::Debug for ChannelServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelServices").finish_non_exhaustive()
    }
}

/// Builds a notifier from its persisted config.
pub type NotifierFactory = Arc<
    dyn Fn(&NotifierConfig, &ChannelServices) -> Result<Arc<dyn Notifier>, NotifyError>
        + Send
        + Sync,
>;

/// A registered channel type.
#[derive(Clone)]
pub struct NotifierDescriptor {
    /// Unique type name, matched against `NotifierConfig::kind`.
    pub kind: String,
    pub name: String,
    pub description: String,
    pub factory: NotifierFactory,
    pub options: Vec<OptionSpec>,
}

impl NotifierDescriptor {
    /// Creates a descriptor with no declared options.
    ///
    /// # Arguments
    ///
    /// * `kind` - Unique type name, matched against `NotifierConfig::kind`.
    /// * `name` - Human-readable channel name.
    /// * `description` - One-line summary shown to operators.
    /// * `factory` - Builds the notifier once its options have been checked.
    pub fn new<F>(
        kind: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn(&NotifierConfig, &ChannelServices) -> Result<Arc<dyn Notifier>, NotifyError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind: kind.into(),
            name: name.into(),
            description: description.into(),
            factory: Arc::new(factory),
            options: Vec::new(),
        }
    }

    /// Declares the settings `build` checks before calling the factory.
    pub fn with_options(mut self, options: Vec<OptionSpec>) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for NotifierDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierDescriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Maps channel type names to their descriptors.
#[derive(Debug)]
pub struct NotifierRegistry {
    services: ChannelServices,
    descriptors: HashMap<String, NotifierDescriptor>,
}

impl NotifierRegistry {
    /// Creates an empty registry.
    pub fn new(services: ChannelServices) -> Self {
        Self {
            services,
            descriptors: HashMap::new(),
        }
    }

    /// Creates a registry holding every built-in channel kind.
    pub fn with_builtin_channels(services: ChannelServices) -> Self {
        let mut registry = Self::new(services);
        for kind in ChannelKind::ALL {
            registry.register(kind.descriptor());
        }
        registry
    }

    /// Adds `descriptor`, rejecting a type name that is already taken.
    pub fn try_register(&mut self, descriptor: NotifierDescriptor) -> Result<(), NotifyError> {
        if self.descriptors.contains_key(&descriptor.kind) {
            return Err(NotifyError::DuplicateChannelType(descriptor.kind));
        }
        debug!(kind = %descriptor.kind, "Registered notifier type");
        self.descriptors.insert(descriptor.kind.clone(), descriptor);
        Ok(())
    }

    /// Adds `descriptor`.
    ///
    /// # Panics
    /// Panics if a descriptor with the same type name is already registered.
    /// Registration happens once at startup, so a duplicate is a programming
    /// error rather than a runtime condition.
    pub fn register(&mut self, descriptor: NotifierDescriptor) {
        if let Err(e) = self.try_register(descriptor) {
            panic!("{}", e);
        }
    }

    /// Looks up the descriptor registered for `kind`.
    pub fn get(&self, kind: &str) -> Option<&NotifierDescriptor> {
        self.descriptors.get(kind)
    }

    /// All registered descriptors, ordered by type name.
    pub fn descriptors(&self) -> Vec<&NotifierDescriptor> {
        let mut all: Vec<_> = self.descriptors.values().collect();
        all.sort_by(|a, b| a.kind.cmp(&b.kind));
        all
    }

    /// Builds the notifier described by `config`.
    ///
    /// Required options are checked before the factory runs. Nothing is
    /// returned unless construction fully succeeds.
    pub fn build(&self, config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
        let descriptor = self
            .descriptors
            .get(&config.kind)
            .ok_or_else(|| NotifyError::UnknownChannelType(config.kind.clone()))?;

        for option in &descriptor.options {
            option.check(&config.settings)?;
        }

        match (descriptor.factory)(config, &self.services) {
            Ok(notifier) => {
                debug!(id = config.id, kind = %config.kind, name = %config.name, "Built notifier");
                Ok(notifier)
            }
            Err(e) => {
                warn!(id = config.id, kind = %config.kind, error = %e, "Failed to build notifier");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EvalContext;
    use crate::notification::base::NotifierBase;
    use crate::notification::settings::{OptionKind, Settings};
    use crate::webhook::{WebhookError, WebhookRequest};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct NullSender;

    #[async_trait]
    impl WebhookSender for NullSender {
        async fn send(&self, _: &CancellationToken, _: WebhookRequest) -> Result<(), WebhookError> {
            Ok(())
        }
    }

    struct StubNotifier {
        base: NotifierBase,
    }

    #[async_trait]
    impl Notifier for StubNotifier {
        fn base(&self) -> &NotifierBase {
            &self.base
        }

        async fn notify(&self, _ctx: &EvalContext) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn services() -> ChannelServices {
        ChannelServices::new(Arc::new(NullSender))
    }

    fn stub_descriptor(kind: &str, calls: Arc<AtomicUsize>) -> NotifierDescriptor {
        NotifierDescriptor::new(kind, "Stub", "A stub channel", move |config, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubNotifier {
                base: NotifierBase::new(config, true),
            }) as Arc<dyn Notifier>)
        })
        .with_options(vec![OptionSpec::required("token", OptionKind::String)])
    }

    fn config(kind: &str, settings: serde_json::Value) -> NotifierConfig {
        NotifierConfig {
            id: 9,
            name: "stub".to_string(),
            kind: kind.to_string(),
            is_default: false,
            settings: serde_json::from_value::<Settings>(settings).unwrap(),
            send_on: Default::default(),
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = NotifierRegistry::new(services());
        registry.try_register(stub_descriptor("stub", calls.clone())).unwrap();

        let err = registry.try_register(stub_descriptor("stub", calls)).unwrap_err();
        assert_eq!(err, NotifyError::DuplicateChannelType("stub".to_string()));
    }

    #[test]
    #[should_panic(expected = "channel type already registered: pagerduty")]
    fn test_register_panics_on_duplicate() {
        let mut registry = NotifierRegistry::with_builtin_channels(services());
        registry.register(ChannelKind::PagerDuty.descriptor());
    }

    #[test]
    fn test_build_unknown_type_constructs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = NotifierRegistry::new(services());
        registry.register(stub_descriptor("stub", calls.clone()));

        let result = registry.build(&config("carrier-pigeon", json!({"token": "t"})));
        assert!(matches!(result, Err(NotifyError::UnknownChannelType(k)) if k == "carrier-pigeon"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_build_checks_required_options_before_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = NotifierRegistry::new(services());
        registry.register(stub_descriptor("stub", calls.clone()));

        let result = registry.build(&config("stub", json!({})));
        assert!(matches!(result, Err(NotifyError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let notifier = registry.build(&config("stub", json!({"token": "t"}))).unwrap();
        assert_eq!(notifier.base().id, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builtin_descriptors() {
        let registry = NotifierRegistry::with_builtin_channels(services());
        let kinds: Vec<_> = registry.descriptors().iter().map(|d| d.kind.clone()).collect();
        assert_eq!(kinds, vec!["pagerduty", "slack", "webhook"]);
    }
}
