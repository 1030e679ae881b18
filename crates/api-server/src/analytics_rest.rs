//! Read-side analytics endpoints. Each handler pulls the events it needs from
//! the store and hands them to the matching analyzer.

use crate::rest::{ApiJson, ApiQuery, ApiResult, AppState};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pulse_core::types::{EventFilter, Granularity, TimeWindow};
use pulse_core::PulseError;
use pulse_reporting::{
    analyze_adoption, analyze_funnel, analyze_retention, AdoptionQuery, AdoptionReport,
    FunnelDefinition, FunnelReport, JourneyQuery, JourneyReport, RetentionQuery, RetentionReport,
};
use serde::Deserialize;
use std::time::Instant;
use utoipa::{IntoParams, ToSchema};

/// Trailing days covered by an adoption request without an explicit start.
const DEFAULT_ADOPTION_DAYS: i64 = 30;

#[derive(Debug, Deserialize, ToSchema)]
pub struct FunnelRequest {
    /// Ordered step event names; at least two, no repeats.
    #[serde(default)]
    pub steps: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RetentionParams {
    /// `day`, `week` or `month`. Defaults to `week`.
    pub granularity: Option<Granularity>,
    pub periods: Option<u32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JourneyParams {
    pub max_path_length: Option<usize>,
    pub limit: Option<usize>,
    pub min_occurrences: Option<u64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AdoptionParams {
    #[serde(default)]
    pub event_name: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

fn record_computation(kind: &'static str, started: Instant) {
    metrics::counter!(format!("analytics.{kind}.computed")).increment(1);
    metrics::histogram!("analytics.compute_seconds", "kind" => kind)
        .record(started.elapsed().as_secs_f64());
}

/// POST /v1/analytics/funnel — Step-by-step conversion.
#[utoipa::path(
    post,
    path = "/v1/analytics/funnel",
    tag = "Analytics",
    request_body = FunnelRequest,
    responses(
        (status = 200, description = "Funnel report", body = FunnelReport),
        (status = 400, description = "Invalid steps or window", body = ErrorResponse)
    )
)]
pub async fn funnel(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FunnelRequest>,
) -> ApiResult<Json<FunnelReport>> {
    let started = Instant::now();
    let definition = FunnelDefinition::new(request.steps);
    definition.validate()?;
    let window = TimeWindow::new(request.start, request.end)?;

    let events = state
        .store
        .query_events(&EventFilter::named(definition.steps.iter().cloned()), &window)
        .await?;
    let report = analyze_funnel(&definition, &events, &window)?;
    record_computation("funnel", started);
    Ok(Json(report))
}

/// GET /v1/analytics/retention — Cohort retention table.
#[utoipa::path(
    get,
    path = "/v1/analytics/retention",
    tag = "Analytics",
    params(RetentionParams),
    responses(
        (status = 200, description = "Retention report", body = RetentionReport),
        (status = 400, description = "Invalid periods or window", body = ErrorResponse)
    )
)]
pub async fn retention(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<RetentionParams>,
) -> ApiResult<Json<RetentionReport>> {
    let started = Instant::now();
    let query = RetentionQuery {
        granularity: params.granularity.unwrap_or(Granularity::Week),
        periods: params
            .periods
            .unwrap_or(state.analytics.default_retention_periods),
        window: TimeWindow::new(params.start, params.end)?,
    };
    query.validate()?;

    // First-seen periods need the whole history, not just the window.
    let events = state
        .store
        .query_events(&EventFilter::default(), &TimeWindow::unbounded())
        .await?;
    let report = analyze_retention(&events, &query)?;
    record_computation("retention", started);
    Ok(Json(report))
}

/// GET /v1/analytics/journeys — Most common in-session paths.
#[utoipa::path(
    get,
    path = "/v1/analytics/journeys",
    tag = "Analytics",
    params(JourneyParams),
    responses(
        (status = 200, description = "Journey report", body = JourneyReport),
        (status = 400, description = "Invalid path length, limit, or window", body = ErrorResponse)
    )
)]
pub async fn journeys(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<JourneyParams>,
) -> ApiResult<Json<JourneyReport>> {
    let started = Instant::now();
    let query = JourneyQuery {
        max_path_length: params
            .max_path_length
            .unwrap_or(state.analytics.default_journey_path_length),
        limit: params.limit.unwrap_or(state.analytics.default_journey_limit),
        min_occurrences: params.min_occurrences.unwrap_or(1),
        window: TimeWindow::new(params.start, params.end)?,
    };
    query.validate()?;

    let events = state
        .store
        .query_events(&EventFilter::default(), &query.window)
        .await?;
    let report = state.journeys.map(&events, &query)?;
    record_computation("journey", started);
    Ok(Json(report))
}

/// GET /v1/analytics/adoption — Daily DAU/WAU/MAU and adoption rate for one feature.
#[utoipa::path(
    get,
    path = "/v1/analytics/adoption",
    tag = "Analytics",
    params(AdoptionParams),
    responses(
        (status = 200, description = "Adoption report", body = AdoptionReport),
        (status = 400, description = "Missing event name or invalid dates", body = ErrorResponse)
    )
)]
pub async fn adoption(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<AdoptionParams>,
) -> ApiResult<Json<AdoptionReport>> {
    let started = Instant::now();
    let end = params.end.unwrap_or_else(|| Utc::now().date_naive());
    let start = match params.start {
        Some(start) => start,
        None => end
            .checked_sub_signed(Duration::days(DEFAULT_ADOPTION_DAYS - 1))
            .ok_or_else(|| PulseError::invalid("date out of range"))?,
    };
    let query = AdoptionQuery {
        event_name: params.event_name,
        start,
        end,
    };
    query.validate()?;

    // Unbounded when `end` is the last representable day.
    let until = end
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc());
    let events = state
        .store
        .query_events(
            &EventFilter::named([query.event_name.clone()]),
            &TimeWindow::new(None, until)?,
        )
        .await?;
    let signups = state.store.user_signups().await?;

    let report = analyze_adoption(&query, &events, &signups)?;
    record_computation("adoption", started);
    Ok(Json(report))
}
