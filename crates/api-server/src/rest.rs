//! Shared REST plumbing: application state, error mapping, and the
//! operational endpoints.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pulse_core::config::AnalyticsConfig;
use pulse_core::PulseError;
use pulse_reporting::{ExperimentAnalyzer, JourneyMapper};
use pulse_store::AnalyticsStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AnalyticsStore>,
    pub analytics: AnalyticsConfig,
    pub experiments: ExperimentAnalyzer,
    pub journeys: Arc<JourneyMapper>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn AnalyticsStore>, analytics: AnalyticsConfig, node_id: String) -> Self {
        let journeys = JourneyMapper::new(chrono::Duration::minutes(
            analytics.session_timeout_minutes,
        ));
        Self {
            store,
            experiments: ExperimentAnalyzer::from_config(&analytics),
            journeys: Arc::new(journeys),
            analytics,
            node_id,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// Handler error: a domain error rendered as a JSON body with the matching status.
#[derive(Debug)]
pub struct ApiError(pub PulseError);

impl From<PulseError> for ApiError {
    fn from(e: PulseError) -> Self {
        Self(e)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body extractor whose rejections use the API error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(PulseError::InvalidInput(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(PulseError::InvalidInput(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(PulseError::InvalidInput(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            PulseError::InvalidInput(msg) => {
                warn!(error = %msg, "Request validation failed");
                metrics::counter!("api.validation_errors").increment(1);
                (StatusCode::BAD_REQUEST, "invalid_input", msg.clone())
            }
            PulseError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            PulseError::StoreUnavailable(detail) => {
                error!(error = %detail, "Event store failure");
                metrics::counter!("api.store_errors").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_unavailable",
                    "Event store unavailable".to_string(),
                )
            }
            other => {
                error!(error = %other, "Request failed");
                metrics::counter!("api.errors").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal processing error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

/// GET /health — Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe. Ready once the event store answers.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready to serve"),
        (status = 503, description = "Event store not reachable")
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /live — Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
