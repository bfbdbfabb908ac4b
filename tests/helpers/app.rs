//! Test helpers for running the full application instance.

use alertrelay::app::App;
use alertrelay::config::Config;
use alertrelay::core::WebhookSender;
use alertrelay::notification::test_utils::RecordingWebhookSender;
use alertrelay::notification::{DispatchConfig, NotifierConfig};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

/// A running application wired to a recording webhook transport.
pub struct TestApp {
    pub app: App,
    pub webhook: Arc<RecordingWebhookSender>,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.app.shutdown().await;
    }
}

pub struct TestAppBuilder {
    config: Config,
    webhook: Arc<RecordingWebhookSender>,
    real_http: bool,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let config = Config {
            app_url: "https://grafana.example.com".to_string(),
            dispatch: DispatchConfig {
                initial_backoff_ms: 10,
                max_backoff_ms: 50,
                attempt_timeout_ms: 2_000,
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            config,
            webhook: Arc::new(RecordingWebhookSender::new()),
            real_http: false,
        }
    }

    pub fn with_notifier(mut self, notifier: NotifierConfig) -> Self {
        self.config.notifiers.push(notifier);
        self
    }

    pub fn with_webhook(mut self, webhook: RecordingWebhookSender) -> Self {
        self.webhook = Arc::new(webhook);
        self
    }

    /// Sends over real HTTP instead of the recording transport.
    pub fn with_real_http(mut self) -> Self {
        self.real_http = true;
        self
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    pub fn build(self) -> Result<TestApp> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut builder = App::builder(self.config);
        if !self.real_http {
            builder = builder.webhook_override(self.webhook.clone() as Arc<dyn WebhookSender>);
        }
        let app = builder.build(shutdown_rx)?;
        Ok(TestApp {
            app,
            webhook: self.webhook,
            shutdown_tx,
        })
    }
}
