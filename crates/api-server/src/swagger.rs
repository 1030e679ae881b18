//! OpenAPI document, served as JSON at `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pulse Analytics API",
        version = "0.1.0",
        description = "Product analytics: event tracking, funnels, cohort retention, user journeys, feature adoption, and A/B experiment evaluation.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Tracking", description = "Event ingestion and listing"),
        (name = "Users", description = "User profiles and erasure"),
        (name = "Experiments", description = "Experiment definitions, assignment, and evaluation"),
        (name = "Analytics", description = "Funnel, retention, journey, and adoption reports"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Tracking
        crate::tracking_rest::record_event,
        crate::tracking_rest::record_batch,
        crate::tracking_rest::list_events,
        crate::tracking_rest::event_names,
        // Users
        crate::tracking_rest::upsert_user,
        crate::tracking_rest::get_user,
        crate::tracking_rest::erase_user,
        // Experiments
        crate::experiment_rest::create_experiment,
        crate::experiment_rest::list_experiments,
        crate::experiment_rest::get_experiment,
        crate::experiment_rest::assign_variant,
        crate::experiment_rest::experiment_results,
        crate::experiment_rest::analyze_records,
        // Analytics
        crate::analytics_rest::funnel,
        crate::analytics_rest::retention,
        crate::analytics_rest::journeys,
        crate::analytics_rest::adoption,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        // Domain types
        pulse_core::types::Event,
        pulse_core::types::NewEvent,
        pulse_core::types::User,
        pulse_core::types::UserUpsert,
        pulse_core::types::Experiment,
        pulse_core::types::NewExperiment,
        pulse_core::types::Assignment,
        pulse_core::types::VariantConversions,
        pulse_core::types::EventNameCount,
        pulse_core::types::TimeWindow,
        pulse_core::types::Granularity,
        pulse_core::types::SignificanceMethod,
        // Reports
        pulse_reporting::funnel::FunnelStepResult,
        pulse_reporting::funnel::FunnelReport,
        pulse_reporting::cohort::CohortRow,
        pulse_reporting::cohort::RetentionReport,
        pulse_reporting::journey::PathCount,
        pulse_reporting::journey::DropOff,
        pulse_reporting::journey::JourneyReport,
        pulse_reporting::adoption::AdoptionPoint,
        pulse_reporting::adoption::StickinessSnapshot,
        pulse_reporting::adoption::AdoptionReport,
        pulse_reporting::experiment::VariantResult,
        pulse_reporting::experiment::ExperimentReport,
        // Request/response envelopes
        crate::tracking_rest::BatchRequest,
        crate::tracking_rest::BatchResponse,
        crate::tracking_rest::UserProfileResponse,
        crate::experiment_rest::AssignRequest,
        crate::experiment_rest::AnalyzeRequest,
        crate::analytics_rest::FunnelRequest,
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/v1/events",
            "/v1/events/batch",
            "/v1/users/{id}",
            "/v1/experiments/{id}/results",
            "/v1/analytics/funnel",
            "/v1/analytics/adoption",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
