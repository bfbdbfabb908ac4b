//! Configuration management for alertrelay
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer an `alertrelay.toml` file, `ALERTRELAY_`
//! environment variables and command-line arguments over built-in defaults.

use crate::cli::Cli;
use crate::notification::{DispatchConfig, NotifierConfig};
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Config file read when no `--config` argument is given.
pub const DEFAULT_CONFIG_FILE: &str = "alertrelay.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The logging level for the application, in `EnvFilter` syntax.
    pub log_level: String,
    /// Public base URL of the dashboard app, used for links back to rules.
    pub app_url: String,
    /// Retry, timeout and failure policy for deliveries.
    pub dispatch: DispatchConfig,
    /// Outbound HTTP settings shared by every channel.
    pub webhook: WebhookConfig,
    pub metrics: MetricsConfig,
    /// The persisted notifier configurations.
    pub notifiers: Vec<NotifierConfig>,
}

/// Configuration for the outbound webhook client.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WebhookConfig {
    /// Overall timeout of a single HTTP request.
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            user_agent: format!("alertrelay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Configuration for the Prometheus metrics endpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9464)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            app_url: "http://localhost:3000/".to_string(),
            dispatch: DispatchConfig::default(),
            webhook: WebhookConfig::default(),
            metrics: MetricsConfig::default(),
            notifiers: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration for `cli`.
    ///
    /// Sources, lowest precedence first: defaults, the TOML file, environment
    /// variables such as `ALERTRELAY_DISPATCH__MAX_RETRIES=5`, then the
    /// command line.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self::figment(path.clone(), cli)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    fn figment(path: PathBuf, cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ALERTRELAY_").split("__"))
            .merge(cli.clone())
    }

    /// Returns the configured notifier with `id`.
    pub fn notifier(&self, id: i64) -> Option<&NotifierConfig> {
        self.notifiers.iter().find(|n| n.id == id)
    }
}
