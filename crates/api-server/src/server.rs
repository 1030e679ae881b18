//! API server: the REST router plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::{analytics_rest, experiment_rest, tracking_rest};
use axum::routing::{get, post};
use axum::{Json, Router};
use pulse_core::config::AppConfig;
use pulse_store::AnalyticsStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

/// Build the full REST application around `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Tracking
        .route(
            "/v1/events",
            post(tracking_rest::record_event).get(tracking_rest::list_events),
        )
        .route("/v1/events/batch", post(tracking_rest::record_batch))
        .route("/v1/events/names", get(tracking_rest::event_names))
        // Users
        .route("/v1/users", post(tracking_rest::upsert_user))
        .route(
            "/v1/users/:id",
            get(tracking_rest::get_user).delete(tracking_rest::erase_user),
        )
        // Experiments
        .route(
            "/v1/experiments",
            post(experiment_rest::create_experiment).get(experiment_rest::list_experiments),
        )
        .route("/v1/experiments/:id", get(experiment_rest::get_experiment))
        .route(
            "/v1/experiments/:id/assign",
            post(experiment_rest::assign_variant),
        )
        .route(
            "/v1/experiments/:id/results",
            get(experiment_rest::experiment_results),
        )
        .route(
            "/v1/experiments/:id/analyze",
            post(experiment_rest::analyze_records),
        )
        // Analytics
        .route("/v1/analytics/funnel", post(analytics_rest::funnel))
        .route("/v1/analytics/retention", get(analytics_rest::retention))
        .route("/v1/analytics/journeys", get(analytics_rest::journeys))
        .route("/v1/analytics/adoption", get(analytics_rest::adoption))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Owns the configuration and store handle for the process lifetime.
pub struct ApiServer {
    config: AppConfig,
    store: Arc<dyn AnalyticsStore>,
}

impl ApiServer {
    pub fn new(config: AppConfig, store: Arc<dyn AnalyticsStore>) -> Self {
        Self { config, store }
    }

    /// Serve HTTP until ctrl-c.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState::new(
            self.store.clone(),
            self.config.analytics.clone(),
            self.config.node_id.clone(),
        );
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics exporter on its own port.
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

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
