//! API server: the REST router plus the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use campaign_core::config::AppConfig;
use campaign_lifecycle::CampaignEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Builds the REST router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Campaign lifecycle
        .route("/v1/campaigns", post(rest::create_campaign))
        .route("/v1/campaigns/:id", get(rest::get_campaign))
        .route("/v1/campaigns/:id/history", get(rest::campaign_history))
        .route("/v1/campaigns/:id/schedule", post(rest::schedule_campaign))
        .route("/v1/campaigns/:id/activate", post(rest::activate_campaign))
        .route("/v1/campaigns/:id/pause", post(rest::pause_campaign))
        .route("/v1/campaigns/:id/resume", post(rest::resume_campaign))
        .route("/v1/campaigns/:id/complete", post(rest::complete_campaign))
        .route("/v1/campaigns/:id/archive", post(rest::archive_campaign))
        // Leads and provider callbacks
        .route("/v1/leads", post(rest::create_lead))
        .route("/v1/events", post(rest::ingest_event))
        // Analytics
        .route("/v1/analytics/campaigns/:id", get(rest::campaign_analytics))
        .route("/v1/analytics/users/:id", get(rest::user_analytics))
        .route("/v1/analytics/global", get(rest::global_analytics))
        .route("/v1/research/users/:id", get(rest::user_research))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<CampaignEngine>,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: Arc<CampaignEngine>) -> Self {
        Self { config, engine }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            engine: self.engine.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Installs the global recorder and spawns the `/metrics` listener onto
    /// the current runtime.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
