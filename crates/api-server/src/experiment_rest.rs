//! Experiment management, assignment, and evaluation endpoints.

use crate::rest::{ApiJson, ApiPath, ApiResult, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use pulse_core::types::{Assignment, Experiment, NewExperiment, VariantConversions};
use pulse_core::PulseError;
use pulse_reporting::ExperimentReport;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRequest {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    /// Conversion records; the first one is treated as the control.
    #[serde(default)]
    pub records: Vec<VariantConversions>,
}

async fn require_experiment(state: &AppState, id: &Uuid) -> ApiResult<Experiment> {
    state
        .store
        .get_experiment(id)
        .await?
        .ok_or_else(|| PulseError::invalid(format!("unknown experiment id {id}")).into())
}

/// POST /v1/experiments — Create an experiment.
#[utoipa::path(
    post,
    path = "/v1/experiments",
    tag = "Experiments",
    request_body = NewExperiment,
    responses(
        (status = 201, description = "Experiment created", body = Experiment),
        (status = 400, description = "Invalid definition", body = ErrorResponse)
    )
)]
pub async fn create_experiment(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<NewExperiment>,
) -> ApiResult<(StatusCode, Json<Experiment>)> {
    let experiment = state.store.create_experiment(request).await?;
    metrics::counter!("experiments.created").increment(1);
    Ok((StatusCode::CREATED, Json(experiment)))
}

/// GET /v1/experiments — List experiments.
#[utoipa::path(
    get,
    path = "/v1/experiments",
    tag = "Experiments",
    responses((status = 200, description = "All experiments", body = Vec<Experiment>))
)]
pub async fn list_experiments(State(state): State<AppState>) -> ApiResult<Json<Vec<Experiment>>> {
    Ok(Json(state.store.list_experiments().await?))
}

/// GET /v1/experiments/:id — Fetch one experiment.
#[utoipa::path(
    get,
    path = "/v1/experiments/{id}",
    tag = "Experiments",
    params(("id" = Uuid, Path, description = "Experiment id")),
    responses(
        (status = 200, description = "Experiment", body = Experiment),
        (status = 400, description = "Unknown experiment id", body = ErrorResponse)
    )
)]
pub async fn get_experiment(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(require_experiment(&state, &id).await?))
}

/// POST /v1/experiments/:id/assign — Bucket a user into a variant.
#[utoipa::path(
    post,
    path = "/v1/experiments/{id}/assign",
    tag = "Experiments",
    params(("id" = Uuid, Path, description = "Experiment id")),
    request_body = AssignRequest,
    responses(
        (status = 200, description = "Existing or new assignment", body = Assignment),
        (status = 400, description = "Unknown experiment or missing user id", body = ErrorResponse)
    )
)]
pub async fn assign_variant(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AssignRequest>,
) -> ApiResult<Json<Assignment>> {
    let assignment = state.store.assign_variant(&id, &request.user_id).await?;
    metrics::counter!("experiments.assignments", "variant" => assignment.variant.clone())
        .increment(1);
    Ok(Json(assignment))
}

/// GET /v1/experiments/:id/results — Evaluate from stored assignments and goal events.
#[utoipa::path(
    get,
    path = "/v1/experiments/{id}/results",
    tag = "Experiments",
    params(("id" = Uuid, Path, description = "Experiment id")),
    responses(
        (status = 200, description = "Evaluation", body = ExperimentReport),
        (status = 400, description = "Unknown experiment id", body = ErrorResponse)
    )
)]
pub async fn experiment_results(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ExperimentReport>> {
    let records = state.store.variant_conversions(&id).await?;
    let report = state.experiments.analyze(id, &records)?;
    metrics::counter!("analytics.experiment.computed").increment(1);
    Ok(Json(report))
}

/// POST /v1/experiments/:id/analyze — Evaluate caller-supplied conversion records.
#[utoipa::path(
    post,
    path = "/v1/experiments/{id}/analyze",
    tag = "Experiments",
    params(("id" = Uuid, Path, description = "Experiment id")),
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Evaluation", body = ExperimentReport),
        (status = 400, description = "Unknown experiment or invalid records", body = ErrorResponse)
    )
)]
pub async fn analyze_records(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AnalyzeRequest>,
) -> ApiResult<Json<ExperimentReport>> {
    require_experiment(&state, &id).await?;
    let report = state.experiments.analyze(id, &request.records)?;
    metrics::counter!("analytics.experiment.computed").increment(1);
    Ok(Json(report))
}
