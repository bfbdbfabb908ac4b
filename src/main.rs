//! alertrelay - alert notification relay
//!
//! Reads rule evaluation events and delivers them to the configured
//! notification channels.

use alertrelay::{
    app::App,
    cli::Cli,
    config::Config,
    notification::ChannelStatus,
};
use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("alertrelay starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("App URL: {}", config.app_url);
    info!(
        "Dispatch: max_retries={} initial_backoff={}ms max_backoff={}ms attempt_timeout={}ms policy={:?}",
        config.dispatch.max_retries,
        config.dispatch.initial_backoff_ms,
        config.dispatch.max_backoff_ms,
        config.dispatch.attempt_timeout_ms,
        config.dispatch.policy
    );
    info!("Webhook Timeout: {}ms", config.webhook.timeout_ms);
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    info!("Notifiers: {}", config.notifiers.len());
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx)?;

    if let Some(id) = cli.test_notifier {
        let outcome = app.send_test_notification(id).await;
        let _ = shutdown_tx.send(true);
        app.shutdown().await;

        let outcome = outcome?;
        return match outcome.status {
            ChannelStatus::Sent => {
                info!(id, attempts = outcome.attempts, "Test notification sent");
                Ok(())
            }
            status => Err(anyhow::anyhow!("Test notification {}", status)),
        };
    }

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = signal_tx.send(true);
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let summary = app.relay(BufReader::new(tokio::io::stdin())).await;
    let _ = shutdown_tx.send(true);
    app.shutdown().await;

    let summary = summary?;
    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some notifications could not be delivered");
    }
    // Stdin is read on a blocking thread that would keep the runtime alive
    // after Ctrl-C until another line arrives.
    std::process::exit(0);
}
