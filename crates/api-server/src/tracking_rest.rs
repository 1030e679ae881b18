//! Event ingestion and user profile endpoints.

use crate::rest::{ApiJson, ApiPath, ApiQuery, ApiResult, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use pulse_core::types::{Event, EventFilter, EventNameCount, NewEvent, TimeWindow, User, UserUpsert};
use pulse_core::PulseError;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

/// Maximum number of events accepted in one batch.
const MAX_BATCH: usize = 1000;

const DEFAULT_EVENT_LIMIT: u32 = 100;
const MAX_EVENT_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchRequest {
    #[serde(default)]
    pub events: Vec<NewEvent>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchResponse {
    pub accepted: usize,
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventQueryParams {
    pub event_name: Option<String>,
    pub user_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Defaults to 100, capped at 1000.
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserProfileResponse {
    #[serde(flatten)]
    pub user: User,
    pub first_event_at: Option<DateTime<Utc>>,
}

/// POST /v1/events — Record a single event.
#[utoipa::path(
    post,
    path = "/v1/events",
    tag = "Tracking",
    request_body = NewEvent,
    responses(
        (status = 201, description = "Event stored", body = Event),
        (status = 400, description = "Missing event name or user id", body = ErrorResponse)
    )
)]
pub async fn record_event(
    State(state): State<AppState>,
    ApiJson(event): ApiJson<NewEvent>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let stored = state.store.record_event(event).await?;
    metrics::counter!("api.events.recorded").increment(1);
    Ok((StatusCode::CREATED, Json(stored)))
}

/// POST /v1/events/batch — Record up to 1000 events atomically.
#[utoipa::path(
    post,
    path = "/v1/events/batch",
    tag = "Tracking",
    request_body = BatchRequest,
    responses(
        (status = 201, description = "All events stored", body = BatchResponse),
        (status = 400, description = "Empty, oversized, or invalid batch", body = ErrorResponse)
    )
)]
pub async fn record_batch(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchResponse>)> {
    if request.events.is_empty() {
        return Err(PulseError::invalid("batch must contain at least one event").into());
    }
    if request.events.len() > MAX_BATCH {
        return Err(PulseError::invalid(format!(
            "batch exceeds the maximum of {MAX_BATCH} events"
        ))
        .into());
    }

    let events = state.store.record_events(request.events).await?;
    metrics::counter!("api.events.recorded").increment(events.len() as u64);
    Ok((
        StatusCode::CREATED,
        Json(BatchResponse {
            accepted: events.len(),
            events,
        }),
    ))
}

/// GET /v1/events — Raw event listing.
#[utoipa::path(
    get,
    path = "/v1/events",
    tag = "Tracking",
    params(EventQueryParams),
    responses(
        (status = 200, description = "Matching events", body = Vec<Event>),
        (status = 400, description = "Malformed date range", body = ErrorResponse)
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<EventQueryParams>,
) -> ApiResult<Json<Vec<Event>>> {
    let window = TimeWindow::new(params.start, params.end)?;
    let filter = EventFilter {
        event_names: params.event_name.map(|name| vec![name]),
        user_id: params.user_id,
        limit: Some(params.limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(MAX_EVENT_LIMIT)),
    };
    let events = state.store.query_events(&filter, &window).await?;
    Ok(Json(events))
}

/// GET /v1/events/names — Distinct event names with volumes.
#[utoipa::path(
    get,
    path = "/v1/events/names",
    tag = "Tracking",
    responses((status = 200, description = "Event names by volume", body = Vec<EventNameCount>))
)]
pub async fn event_names(State(state): State<AppState>) -> ApiResult<Json<Vec<EventNameCount>>> {
    Ok(Json(state.store.event_names().await?))
}

/// POST /v1/users — Create a user or merge properties into an existing one.
#[utoipa::path(
    post,
    path = "/v1/users",
    tag = "Users",
    request_body = UserUpsert,
    responses(
        (status = 200, description = "Stored profile", body = User),
        (status = 400, description = "Missing user id", body = ErrorResponse)
    )
)]
pub async fn upsert_user(
    State(state): State<AppState>,
    ApiJson(user): ApiJson<UserUpsert>,
) -> ApiResult<Json<User>> {
    let user = state.store.upsert_user(user).await?;
    metrics::counter!("api.users.upserted").increment(1);
    Ok(Json(user))
}

/// GET /v1/users/:id — Profile plus first-seen time.
#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    tag = "Users",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User profile", body = UserProfileResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse)
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<UserProfileResponse>> {
    let user = state
        .store
        .get_user(&id)
        .await?
        .ok_or_else(|| PulseError::NotFound(format!("user {id}")))?;
    let first_event_at = state.store.first_event_timestamp(&id).await?;
    Ok(Json(UserProfileResponse {
        user,
        first_event_at,
    }))
}

/// DELETE /v1/users/:id — Erase a user and everything recorded about them.
#[utoipa::path(
    delete,
    path = "/v1/users/{id}",
    tag = "Users",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 204, description = "User erased"),
        (status = 404, description = "Unknown user", body = ErrorResponse)
    )
)]
pub async fn erase_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<StatusCode> {
    if state.store.erase_user(&id).await? {
        info!(user_id = %id, "User erased on request");
        metrics::counter!("api.users.erased").increment(1);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PulseError::NotFound(format!("user {id}")).into())
    }
}
