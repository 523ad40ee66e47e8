//! Campaign Dispatch: multi-channel outreach campaigns with lifecycle
//! control, rate-limited dispatch and engagement analytics.
//!
//! Main entry point that initializes the engine and starts the server.

use campaign_analytics::ClickHouseExporter;
use campaign_api::ApiServer;
use campaign_core::config::AppConfig;
use campaign_lifecycle::CampaignEngine;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-dispatch")]
#[command(about = "Multi-channel outreach campaign engine")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "CAMPAIGN_DISPATCH_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__METRICS__PORT")]
    metrics_port: Option<u16>,
}

/// An explicit config file must load. Without one, a broken environment
/// overlay falls back to defaults.
fn load_config(path: Option<&str>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            AppConfig::load(Some(path)).with_context(|| format!("failed to load config file {path}"))
        }
        None => Ok(AppConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        })),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_dispatch=info,campaign_lifecycle=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Dispatch starting up");

    let mut config = load_config(cli.config.as_deref())?;

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        "Configuration loaded"
    );

    let mut builder = CampaignEngine::builder(config.clone());
    if config.analytics.clickhouse.enabled {
        match ClickHouseExporter::start(&config.analytics.clickhouse, config.node_id.clone()).await {
            Ok(exporter) => builder = builder.with_event_sink(Arc::new(exporter)),
            Err(e) => error!(error = %e, "Failed to connect to ClickHouse, export disabled"),
        }
    }
    let engine = builder.build();

    let api_server = ApiServer::new(config.clone(), engine.clone());

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Scheduler: opens and closes schedule windows.
    let scheduler = engine.clone();
    let tick_every = Duration::from_millis(config.scheduler.tick_interval_ms.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_every);
        loop {
            interval.tick().await;
            let report = scheduler.tick(chrono::Utc::now());
            if !report.activated.is_empty() || !report.completed.is_empty() {
                info!(
                    activated = report.activated.len(),
                    completed = report.completed.len(),
                    "Scheduler tick"
                );
            }
        }
    });

    // Releases buffered out-of-order events whose predecessor never arrived.
    let sweeper = engine.clone();
    let sweep_every = Duration::from_millis(config.scheduler.reorder_sweep_interval_ms.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let released = sweeper.release_expired(chrono::Utc::now());
            if released > 0 {
                info!(released, "Released buffered events");
            }
        }
    });

    info!("Campaign Dispatch is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
