//! Pulse — product analytics service.
//!
//! Loads configuration, opens the event store, and serves the REST API.

use clap::Parser;
use pulse_api::ApiServer;
use pulse_core::config::AppConfig;
use pulse_store::{AnalyticsStore, SqliteStore};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "pulse-server")]
#[command(about = "Product analytics: funnels, retention, journeys, adoption, and A/B testing")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "PULSE__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "PULSE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "PULSE__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(long, env = "PULSE__DATABASE__PATH")]
    database: Option<String>,

    /// Do not start the Prometheus exporter
    #[arg(long, default_value_t = false)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_server=info,pulse_api=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Pulse starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    if cli.no_metrics {
        config.metrics.enabled = false;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        database = %config.database.path,
        significance = ?config.analytics.significance_method,
        "Configuration loaded"
    );

    let store: Arc<dyn AnalyticsStore> = Arc::new(SqliteStore::connect(&config.database).await?);
    info!(path = %config.database.path, "Event store opened");

    let api_server = ApiServer::new(config.clone(), store);

    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics().await {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("Pulse is ready to serve traffic");

    // Blocks until shutdown
    api_server.start_http().await?;

    Ok(())
}
