//! Command-Line Interface (CLI) argument parsing.
//!
//! These arguments are parsed at startup and merged over the configuration
//! from `alertrelay.toml` and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Relays alert rule evaluations to notification channels.
///
/// Reads newline-delimited JSON evaluation events from stdin and delivers
/// each one to the notifiers attached to its rule.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `alertrelay=debug`.
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Public base URL of the dashboard app.
    #[arg(long, value_name = "URL")]
    pub app_url: Option<String>,

    /// Expose Prometheus metrics on the configured listen address.
    #[arg(long)]
    pub metrics: bool,

    /// Send a test notification through the notifier with this id and exit.
    #[arg(long, value_name = "ID")]
    pub test_notifier: Option<i64>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(url) = &self.app_url {
            dict.insert("app_url".into(), Value::from(url.clone()));
        }

        // A bare flag can only switch metrics on.
        if self.metrics {
            let mut metrics = Dict::new();
            metrics.insert("enabled".into(), Value::from(true));
            dict.insert("metrics".into(), Value::from(metrics));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::parse_from([
            "alertrelay",
            "--config",
            "/etc/alertrelay.toml",
            "--test-notifier",
            "4",
            "--metrics",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/alertrelay.toml")));
        assert_eq!(cli.test_notifier, Some(4));
        assert!(cli.metrics);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn test_unset_arguments_provide_nothing() {
        let data = Cli::default().data().unwrap();
        assert!(data[&Profile::Default].is_empty());
    }
}
