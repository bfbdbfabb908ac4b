//! Resolution of public links back to a rule's panel.

use crate::core::{RuleRef, RuleUrlResolver};
use crate::notification::NotifyError;

/// Builds rule links relative to the public application URL.
#[derive(Debug, Clone)]
pub struct AppUrlResolver {
    app_url: String,
}

impl AppUrlResolver {
    /// Creates a new resolver. A trailing slash is added to `app_url` if missing.
    pub fn new(app_url: impl Into<String>) -> Self {
        let mut app_url = app_url.into();
        if !app_url.ends_with('/') {
            app_url.push('/');
        }
        Self { app_url }
    }
}

impl RuleUrlResolver for AppUrlResolver {
    fn rule_url(&self, rule: &RuleRef) -> Result<String, NotifyError> {
        let slug = rule
            .dashboard_slug
            .as_deref()
            .filter(|slug| !slug.is_empty())
            .ok_or_else(|| {
                NotifyError::LinkResolution(format!("rule {} has no dashboard", rule.id))
            })?;
        let panel_id = rule.panel_id.ok_or_else(|| {
            NotifyError::LinkResolution(format!("rule {} has no panel id", rule.id))
        })?;

        Ok(format!(
            "{}dashboard/db/{}?fullscreen&edit&tab=alert&panelId={}&orgId={}",
            self.app_url, slug, panel_id, rule.org_id
        ))
    }
}
