//! End-to-end request flows against the in-process router and a scratch
//! SQLite database.

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use pulse_api::{router, AppState};
    use pulse_core::config::{AnalyticsConfig, DatabaseConfig};
    use pulse_store::{AnalyticsStore, SqliteStore};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app() -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("api.db").display().to_string(),
            max_connections: 4,
        };
        let store: Arc<dyn AnalyticsStore> = Arc::new(SqliteStore::connect(&config).await.unwrap());
        let state = AppState::new(store, AnalyticsConfig::default(), "test-node".to_string());
        (router(state), dir)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn event(name: &str, user: &str, ts: &str) -> Value {
        json!({ "event_name": name, "user_id": user, "timestamp": ts })
    }

    #[tokio::test]
    async fn test_probes() {
        let (app, _dir) = test_app().await;
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "test-node");

        let (status, _) = send(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, doc) = send(&app, Method::GET, "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/v1/events"].is_object());
    }

    #[tokio::test]
    async fn test_event_ingestion_and_validation() {
        let (app, _dir) = test_app().await;

        let (status, stored) = send(
            &app,
            Method::POST,
            "/v1/events",
            Some(event("signup", "u1", "2024-03-01T10:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(stored["event_name"], "signup");
        assert!(stored["id"].is_string());

        let (status, err) = send(
            &app,
            Method::POST,
            "/v1/events",
            Some(json!({ "user_id": "u1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "invalid_input");

        let (status, err) = send(&app, Method::POST, "/v1/events/batch", Some(json!({ "events": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "invalid_input");

        let (status, listed) = send(&app, Method::GET, "/v1/events?user_id=u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            Method::GET,
            "/v1/events?start=2024-03-02T00:00:00Z&end=2024-03-01T00:00:00Z",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_user_profile_and_erasure() {
        let (app, _dir) = test_app().await;
        send(
            &app,
            Method::POST,
            "/v1/events",
            Some(event("login", "alice", "2024-03-05T08:00:00Z")),
        )
        .await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/v1/users",
            Some(json!({ "id": "alice", "properties": { "plan": "pro" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, profile) = send(&app, Method::GET, "/v1/users/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["id"], "alice");
        assert_eq!(profile["properties"]["plan"], "pro");
        assert!(profile["first_event_at"].is_string());

        let (status, _) = send(&app, Method::DELETE, "/v1/users/alice", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, err) = send(&app, Method::GET, "/v1/users/alice", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "not_found");

        let (status, _) = send(&app, Method::DELETE, "/v1/users/alice", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_funnel_report() {
        let (app, _dir) = test_app().await;
        let events = json!({ "events": [
            event("signup", "u1", "2024-03-01T10:00:00Z"),
            event("view", "u1", "2024-03-01T10:05:00Z"),
            event("purchase", "u1", "2024-03-01T10:10:00Z"),
            event("signup", "u2", "2024-03-01T11:00:00Z"),
            event("view", "u2", "2024-03-01T11:30:00Z"),
            event("signup", "u3", "2024-03-01T12:00:00Z"),
            // Purchase before signup does not count.
            event("purchase", "u3", "2024-03-01T09:00:00Z"),
        ]});
        let (status, batch) = send(&app, Method::POST, "/v1/events/batch", Some(events)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(batch["accepted"], 7);

        let (status, report) = send(
            &app,
            Method::POST,
            "/v1/analytics/funnel",
            Some(json!({ "steps": ["signup", "view", "purchase"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let counts: Vec<u64> = report["steps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["user_count"].as_u64().unwrap())
            .collect();
        assert_eq!(counts, vec![3, 2, 1]);

        let (status, err) = send(
            &app,
            Method::POST,
            "/v1/analytics/funnel",
            Some(json!({ "steps": ["signup"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_retention_journeys_and_adoption() {
        let (app, _dir) = test_app().await;
        let events = json!({ "events": [
            event("open", "u1", "2024-03-01T09:00:00Z"),
            event("search", "u1", "2024-03-01T09:01:00Z"),
            event("open", "u1", "2024-03-02T09:00:00Z"),
            event("open", "u2", "2024-03-01T15:00:00Z"),
            event("search", "u2", "2024-03-01T15:02:00Z"),
            event("export", "u2", "2024-03-03T15:00:00Z"),
        ]});
        send(&app, Method::POST, "/v1/events/batch", Some(events)).await;

        let (status, retention) = send(
            &app,
            Method::GET,
            "/v1/analytics/retention?granularity=day&periods=3",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let cohort = &retention["cohorts"][0];
        assert_eq!(cohort["cohort_label"], "2024-03-01");
        assert_eq!(cohort["cohort_size"], 2);
        assert_eq!(cohort["retained"], json!([2, 1, 1]));

        let (status, _) = send(&app, Method::GET, "/v1/analytics/retention?periods=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, journeys) = send(
            &app,
            Method::GET,
            "/v1/analytics/journeys?max_path_length=2",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(journeys["total_users"], 2);
        assert_eq!(journeys["paths"][0]["path"], json!(["open", "search"]));
        assert_eq!(journeys["paths"][0]["count"], 2);

        let (status, adoption) = send(
            &app,
            Method::GET,
            "/v1/analytics/adoption?event_name=search&start=2024-03-01&end=2024-03-03",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let series = adoption["series"].as_array().unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0]["dau"], 2);
        assert_eq!(series[1]["dau"], 0);

        let (status, _) = send(
            &app,
            Method::GET,
            "/v1/analytics/adoption?event_name=search&start=2024-03-05&end=2024-03-01",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_experiment_lifecycle() {
        let (app, _dir) = test_app().await;
        let (status, experiment) = send(
            &app,
            Method::POST,
            "/v1/experiments",
            Some(json!({
                "name": "checkout-button",
                "variants": ["control", "green"],
                "goal_event": "purchase"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = experiment["id"].as_str().unwrap().to_string();

        let assign_uri = format!("/v1/experiments/{id}/assign");
        let (status, first) = send(&app, Method::POST, &assign_uri, Some(json!({ "user_id": "u1" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, again) = send(&app, Method::POST, &assign_uri, Some(json!({ "user_id": "u1" }))).await;
        assert_eq!(first["variant"], again["variant"]);

        send(
            &app,
            Method::POST,
            "/v1/events",
            Some(json!({ "event_name": "purchase", "user_id": "u1" })),
        )
        .await;

        let (status, report) = send(&app, Method::GET, &format!("/v1/experiments/{id}/results"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["control"], "control");
        let variants = report["variants"].as_array().unwrap();
        assert_eq!(variants.len(), 2);
        let exposed: u64 = variants.iter().map(|v| v["user_count"].as_u64().unwrap()).sum();
        let converted: u64 = variants
            .iter()
            .map(|v| v["conversion_count"].as_u64().unwrap())
            .sum();
        assert_eq!((exposed, converted), (1, 1));

        let (status, report) = send(
            &app,
            Method::POST,
            &format!("/v1/experiments/{id}/analyze"),
            Some(json!({ "records": [
                { "variant": "control", "user_count": 1000, "conversion_count": 100 },
                { "variant": "green", "user_count": 1000, "conversion_count": 130 }
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["winner"], "green");
        assert_eq!(report["significant"], true);

        let (status, list) = send(&app, Method::GET, "/v1/experiments", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    async fn send_raw(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, String, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_malformed_requests_use_error_envelope() {
        let (app, _dir) = test_app().await;
        let cases = [
            (Method::POST, "/v1/analytics/funnel", "{}"),
            (Method::POST, "/v1/experiments", r#"{"variants": ["a", "b"], "goal_event": "buy"}"#),
            (Method::POST, "/v1/events/batch", "{}"),
            (Method::POST, "/v1/events", "{not json"),
            (Method::GET, "/v1/analytics/adoption", ""),
            (Method::GET, "/v1/analytics/retention?granularity=year", ""),
            (Method::GET, "/v1/events?limit=lots", ""),
            (Method::GET, "/v1/experiments/not-a-uuid", ""),
        ];
        for (method, uri, body) in cases {
            let (status, content_type, err) = send_raw(&app, method, uri, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(content_type.starts_with("application/json"), "{uri}: {content_type}");
            assert_eq!(err["error"], "invalid_input", "{uri}");
            assert!(err["message"].is_string());
        }

        let id = uuid::Uuid::new_v4();
        let (status, _, err) =
            send_raw(&app, Method::POST, &format!("/v1/experiments/{id}/analyze"), "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_adoption_dates_at_calendar_edges() {
        let (app, _dir) = test_app().await;

        // Default start would precede the earliest representable day.
        let (status, err) = send(
            &app,
            Method::GET,
            "/v1/analytics/adoption?event_name=x&end=-262143-01-05",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "invalid_input");

        let (status, report) = send(
            &app,
            Method::GET,
            "/v1/analytics/adoption?event_name=x&start=%2B262142-12-30&end=%2B262142-12-31",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["series"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_invalid_input() {
        let (app, _dir) = test_app().await;
        let missing = uuid::Uuid::new_v4();
        for (method, uri, body) in [
            (Method::GET, format!("/v1/experiments/{missing}"), None),
            (
                Method::POST,
                format!("/v1/experiments/{missing}/assign"),
                Some(json!({ "user_id": "u1" })),
            ),
            (Method::GET, format!("/v1/experiments/{missing}/results"), None),
        ] {
            let (status, err) = send(&app, method, &uri, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(err["error"], "invalid_input");
        }
    }
}
