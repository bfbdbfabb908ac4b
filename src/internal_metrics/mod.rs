//! # Internal Metrics Module
//!
//! Notification metrics are recorded through the `metrics` facade at the call
//! site, labelled by channel `type`. When metrics are enabled the binary
//! installs a Prometheus recorder and serves it over HTTP.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: installs the Prometheus recorder, binds the
//!   listener and returns the `MetricsServer` to spawn.
//! - **`MetricsServer`**: (Defined in `server.rs`) an `axum` server exposing
//!   `/metrics` for Prometheus to scrape.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use anyhow::{Context, Result};
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub mod server;

/// Counter of successful deliveries.
pub const NOTIFICATIONS_SENT: &str = "alerting_notifications_sent_total";
/// Counter of deliveries that failed after their last attempt.
pub const NOTIFICATIONS_FAILED: &str = "alerting_notifications_failed_total";
/// Counter of evaluations a channel's send policy declined.
pub const NOTIFICATIONS_SKIPPED: &str = "alerting_notifications_skipped_total";
/// Histogram of single attempt durations.
pub const NOTIFICATION_DURATION: &str = "alerting_notification_duration_seconds";

/// Registers descriptions for every metric with the global recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(NOTIFICATIONS_SENT, Unit::Count, "Total number of notifications delivered, labeled by channel type.");
    metrics::describe_counter!(NOTIFICATIONS_FAILED, Unit::Count, "Total number of notifications that failed after all retries, labeled by channel type.");
    metrics::describe_counter!(NOTIFICATIONS_SKIPPED, Unit::Count, "Total number of notifications suppressed by a channel's send policy, labeled by channel type.");
    metrics::describe_histogram!(
        NOTIFICATION_DURATION,
        Unit::Seconds,
        "The time in seconds a single delivery attempt takes, labeled by channel type."
    );
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    /// Creates a new `MetricsBuilder`.
    ///
    /// # Arguments
    ///
    /// * `config` - Whether metrics are enabled and where the server listens.
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and prepares the server.
    ///
    /// Returns `None` when metrics are disabled. Must be called from within a
    /// Tokio runtime.
    pub fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Option<(MetricsServer, SocketAddr)>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .context("Invalid histogram buckets")?
            .build_recorder();
        let handle = recorder.handle();

        let listener = std::net::TcpListener::bind(self.config.listen_address).with_context(|| {
            format!("Failed to bind metrics server to {}", self.config.listen_address)
        })?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        metrics::set_global_recorder(recorder).context("Failed to install Prometheus recorder")?;
        describe_metrics();

        Ok(Some((MetricsServer::new(listener, handle, shutdown_rx), addr)))
    }
}
