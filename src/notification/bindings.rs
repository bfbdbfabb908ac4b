//! The in-memory binding of built notifiers to rules.
//!
//! Notifiers are built once from their configs and kept in a snapshot that
//! is swapped atomically whenever a config changes, so evaluation workers
//! never see a half-updated set.

use crate::core::RuleRef;
use crate::notification::{Notifier, NotifierConfig, NotifierRegistry, NotifyError};
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A notifier config that could not be built.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildFailure {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub error: NotifyError,
}

/// The built notifiers of the running process, keyed by id.
///
/// Reads never block; `load`, `upsert` and `remove` swap in a new map.
pub struct NotifierBindings {
    registry: Arc<NotifierRegistry>,
    notifiers: ArcSwap<BTreeMap<i64, Arc<dyn Notifier>>>,
}

impl NotifierBindings {
    /// Creates empty bindings that build notifiers through `registry`.
    pub fn new(registry: Arc<NotifierRegistry>) -> Self {
        Self {
            registry,
            notifiers: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }

    /// Replaces every binding with notifiers built from `configs`.
    ///
    /// A config that fails to build is left out and reported; the others
    /// are still loaded.
    pub fn load(&self, configs: &[NotifierConfig]) -> Vec<BuildFailure> {
        let mut notifiers = BTreeMap::new();
        let mut failures = Vec::new();

        for config in configs {
            let result = if notifiers.contains_key(&config.id) {
                Err(NotifyError::validation(format!(
                    "duplicate notifier id {}",
                    config.id
                )))
            } else {
                self.registry.build(config)
            };

            match result {
                Ok(notifier) => {
                    notifiers.insert(config.id, notifier);
                }
                Err(error) => {
                    warn!(id = config.id, name = %config.name, error = %error, "Skipping notifier");
                    failures.push(BuildFailure {
                        id: config.id,
                        name: config.name.clone(),
                        kind: config.kind.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            loaded = notifiers.len(),
            failed = failures.len(),
            "Notifier bindings loaded"
        );
        self.notifiers.store(Arc::new(notifiers));
        failures
    }

    /// Builds `config` and replaces any notifier with the same id.
    ///
    /// On failure the previous notifier, if any, stays in place.
    pub fn upsert(&self, config: &NotifierConfig) -> Result<(), NotifyError> {
        let notifier = self.registry.build(config)?;
        self.notifiers.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.insert(config.id, notifier.clone());
            next
        });
        Ok(())
    }

    /// Removes the notifier with `id`. Returns whether one was bound.
    pub fn remove(&self, id: i64) -> bool {
        let previous = self.notifiers.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.remove(&id);
            next
        });
        previous.contains_key(&id)
    }

    /// Returns the notifier bound to `id`.
    pub fn get(&self, id: i64) -> Option<Arc<dyn Notifier>> {
        self.notifiers.load().get(&id).cloned()
    }

    /// Number of bound notifiers.
    pub fn len(&self) -> usize {
        self.notifiers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The notifiers attached to `rule`: its explicit notifiers in the order
    /// listed, then every default notifier. Each notifier appears once.
    pub fn attached(&self, rule: &RuleRef) -> Vec<Arc<dyn Notifier>> {
        let snapshot = self.notifiers.load();
        let mut seen = HashSet::new();
        let mut attached = Vec::new();

        for id in &rule.notifier_ids {
            if !seen.insert(*id) {
                continue;
            }
            match snapshot.get(id) {
                Some(notifier) => attached.push(notifier.clone()),
                None => warn!(rule_id = rule.id, notifier_id = id, "Rule references unknown notifier"),
            }
        }

        for (id, notifier) in snapshot.iter() {
            if notifier.base().is_default && seen.insert(*id) {
                attached.push(notifier.clone());
            }
        }

        attached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::test_utils::RecordingWebhookSender;
    use crate::notification::{ChannelServices, Settings};
    use serde_json::json;

    fn registry() -> Arc<NotifierRegistry> {
        Arc::new(NotifierRegistry::with_builtin_channels(ChannelServices::new(Arc::new(
            RecordingWebhookSender::new(),
        ))))
    }

    fn slack(id: i64, is_default: bool) -> NotifierConfig {
        NotifierConfig {
            id,
            name: format!("slack-{}", id),
            kind: "slack".to_string(),
            is_default,
            settings: serde_json::from_value::<Settings>(json!({"url": "https://hooks.example.com/x"}))
                .unwrap(),
            send_on: Default::default(),
        }
    }

    fn rule(notifier_ids: Vec<i64>) -> RuleRef {
        RuleRef {
            id: 1,
            name: "r".to_string(),
            notifier_ids,
            ..Default::default()
        }
    }

    fn ids(notifiers: &[Arc<dyn Notifier>]) -> Vec<i64> {
        notifiers.iter().map(|n| n.base().id).collect()
    }

    #[test]
    fn test_load_reports_failures_and_keeps_the_rest() {
        let bindings = NotifierBindings::new(registry());
        let mut broken = slack(2, false);
        broken.settings = Settings::default();
        let mut unknown = slack(3, false);
        unknown.kind = "fax".to_string();

        let failures = bindings.load(&[slack(1, false), broken, unknown, slack(1, false)]);

        assert_eq!(bindings.len(), 1);
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[0].error, NotifyError::Validation { .. }));
        assert_eq!(failures[1].error, NotifyError::UnknownChannelType("fax".to_string()));
        assert_eq!(failures[2].id, 1);
    }

    #[test]
    fn test_attached_includes_defaults_once() {
        let bindings = NotifierBindings::new(registry());
        bindings.load(&[slack(1, false), slack(2, true), slack(3, false), slack(4, true)]);

        assert_eq!(ids(&bindings.attached(&rule(vec![3, 2, 3]))), vec![3, 2, 4]);
        assert_eq!(ids(&bindings.attached(&rule(vec![]))), vec![2, 4]);
        assert_eq!(ids(&bindings.attached(&rule(vec![99]))), vec![2, 4]);
    }

    #[test]
    fn test_upsert_and_remove() {
        let bindings = NotifierBindings::new(registry());
        bindings.load(&[slack(1, false)]);

        let mut renamed = slack(1, true);
        renamed.name = "renamed".to_string();
        bindings.upsert(&renamed).unwrap();
        assert_eq!(bindings.get(1).unwrap().base().name, "renamed");

        let mut broken = slack(1, false);
        broken.settings = Settings::default();
        assert!(bindings.upsert(&broken).is_err());
        assert_eq!(bindings.get(1).unwrap().base().name, "renamed");

        assert!(bindings.remove(1));
        assert!(!bindings.remove(1));
        assert!(bindings.is_empty());
    }
}
