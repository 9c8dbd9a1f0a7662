//! Integration tests for all API endpoints.
//!
//! Each test boots the full Axum router (same assembly as `main.rs`) using
//! `tower::ServiceExt::oneshot`, with no live server.
//!
//! `build_test_app()` wires together:
//! - An in-memory SQLite pool with all tables created
//! - A `FacilityStore` seeded with one facility and one HVAC unit
//! - The cached `MetricsService` and Prometheus `AppMetrics`
//! - The complete `Router` returned ready for `oneshot`

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

use masterbus_metrics::{
    aggregation::{AggregationConfig, FacilityAggregator, MetricsService},
    api::{self, AppState},
    cache::CacheSettings,
    db,
    metrics::AppMetrics,
    repository::FacilityRepository,
    store::FacilityStore,
};

// ---- Helpers ----------------------------------------------------------------

const Q1: &str = "start=2024-01-01T00:00:00Z&end=2024-03-01T00:00:00Z";

struct TestApp {
    router: Router,
    state: AppState,
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> axum::response::Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

/// Build the complete test router.
///
/// The store holds facility `F1` (organization `acme`) with HVAC unit `E1`:
/// on time on 2024-01-05, overdue on 2024-02-10. The same rows are written
/// to the in-memory database so persistence paths are exercised.
async fn build_test_app() -> TestApp {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    let repository = Arc::new(FacilityRepository::new(pool));

    let store = Arc::new(RwLock::new(FacilityStore::new()));
    let aggregator = FacilityAggregator::new(store.clone(), AggregationConfig::default());
    let metrics = Arc::new(AppMetrics::new().unwrap());
    let service = MetricsService::new(aggregator, CacheSettings::default())
        .with_metrics(metrics.clone());

    let state = AppState {
        service,
        store,
        repository: Some(repository),
        metrics,
    };
    let app = TestApp {
        router: api::create_router(state.clone()),
        state,
    };

    let created = app
        .post(
            "/facilities",
            json!({ "id": "F1", "name": "North Plant", "organization_id": "acme" }),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    let created = app
        .post(
            "/equipment",
            json!({
                "id": "E1",
                "facility_id": "F1",
                "equipment_type": "hvac",
                "maintenance_records": [
                    { "id": "r1", "performed_at": "2024-01-05T00:00:00Z", "outcome": "on_time" },
                    { "id": "r2", "performed_at": "2024-02-10T00:00:00Z", "outcome": "overdue" }
                ]
            }),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    app
}

/// Convenience: collect body bytes and parse as JSON.
async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---- GET /health ------------------------------------------------------------

#[tokio::test]
async fn health_reports_cache_occupancy() {
    let app = build_test_app().await;
    app.get(&format!("/facilities/F1/metrics?{}", Q1)).await;

    let resp = app.get("/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");

    let json = json_body(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["cache"]["entries"], 1);
    assert_eq!(json["cache"]["capacity"], 1024);
}

// ---- GET /facilities/:id/metrics --------------------------------------------

#[tokio::test]
async fn facility_metrics_returns_example_score() {
    let app = build_test_app().await;
    let resp = app.get(&format!("/facilities/F1/metrics?{}", Q1)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "max-age=300");
    assert!(resp.headers().contains_key(header::ETAG));

    let json = json_body(resp).await;
    assert_eq!(json["facility_id"], "F1");
    assert_eq!(json["organization_id"], "acme");
    assert_eq!(json["score"], 0.5);
    assert_eq!(json["neutral"], false);
    assert_eq!(json["breakdown"][0]["equipment_type"], "hvac");
}

#[tokio::test]
async fn facility_metrics_honours_if_none_match() {
    let app = build_test_app().await;
    let uri = format!("/facilities/F1/metrics?{}", Q1);

    let first = app.get(&uri).await;
    let etag = first.headers()[header::ETAG].to_str().unwrap().to_string();

    let second = app
        .send(
            Request::builder()
                .uri(&uri)
                .header(header::IF_NONE_MATCH, &etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers()[header::ETAG], etag.as_str());
}

#[tokio::test]
async fn repeated_requests_are_served_from_cache() {
    let app = build_test_app().await;
    let uri = format!("/facilities/F1/metrics?{}", Q1);

    app.get(&uri).await;
    app.get(&uri).await;

    let stats = app.state.service.cache_stats().await;
    assert_eq!(stats.facility.computations, 1);
    assert_eq!(stats.facility.hits, 1);
}

#[tokio::test]
async fn inverted_window_is_bad_request() {
    let app = build_test_app().await;
    let resp = app
        .get("/facilities/F1/metrics?start=2024-06-01T00:00:00Z&end=2024-01-01T00:00:00Z")
        .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp).await;
    assert_eq!(json["error"]["kind"], "invalid_window");
}

#[tokio::test]
async fn malformed_timestamp_is_validation_error() {
    let app = build_test_app().await;
    let resp = app.get("/facilities/F1/metrics?start=yesterday").await;

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(resp).await;
    assert_eq!(json["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn unknown_facility_is_not_found() {
    let app = build_test_app().await;
    let resp = app.get(&format!("/facilities/F404/metrics?{}", Q1)).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = json_body(resp).await;
    assert_eq!(json["error"]["kind"], "facility_not_found");
}

#[tokio::test]
async fn facility_without_window_uses_default() {
    let app = build_test_app().await;
    let resp = app.get("/facilities/F1/metrics").await;

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    // The seeded history is from 2024, outside the trailing 30 days.
    assert_eq!(json["neutral"], true);
    assert_eq!(json["score"], 1.0);
}

// ---- GET /organizations/:id/metrics -----------------------------------------

#[tokio::test]
async fn organization_metrics_roll_up_facilities() {
    let app = build_test_app().await;
    app.post(
        "/facilities",
        json!({ "id": "F2", "name": "South Plant", "organization_id": "acme" }),
    )
    .await;
    app.post(
        "/equipment",
        json!({
            "id": "G1",
            "facility_id": "F2",
            "equipment_type": "generator",
            "maintenance_records": [
                { "id": "g1", "performed_at": "2024-01-15T00:00:00Z", "outcome": "on_time" }
            ]
        }),
    )
    .await;

    let resp = app.get(&format!("/organizations/acme/metrics?{}", Q1)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let json = json_body(resp).await;
    assert_eq!(json["facility_count"], 2);
    assert_eq!(json["equipment_count"], 2);
    assert_eq!(json["score"], 0.75);
}

#[tokio::test]
async fn unknown_organization_is_not_found() {
    let app = build_test_app().await;
    let resp = app.get(&format!("/organizations/initech/metrics?{}", Q1)).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = json_body(resp).await;
    assert_eq!(json["error"]["kind"], "organization_not_found");
}

// ---- POST intake ------------------------------------------------------------

#[tokio::test]
async fn new_maintenance_record_invalidates_cached_metric() {
    let app = build_test_app().await;
    let uri = format!("/facilities/F1/metrics?{}", Q1);
    assert_eq!(json_body(app.get(&uri).await).await["score"], 0.5);

    let resp = app
        .post(
            "/equipment/E1/maintenance",
            json!({ "id": "r3", "performed_at": "2024-02-20T00:00:00Z", "outcome": "missed" }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = json_body(resp).await;
    assert_eq!(json["equipment_id"], "E1");

    let score = json_body(app.get(&uri).await).await["score"]
        .as_f64()
        .unwrap();
    assert!((score - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn maintenance_for_unknown_equipment_is_not_found() {
    let app = build_test_app().await;
    let resp = app
        .post(
            "/equipment/ghost/maintenance",
            json!({ "id": "r1", "performed_at": "2024-02-20T00:00:00Z", "outcome": "on_time" }),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["error"]["kind"], "equipment_not_found");
}

#[tokio::test]
async fn maintenance_with_mismatched_equipment_id_is_rejected() {
    let app = build_test_app().await;
    let resp = app
        .post(
            "/equipment/E1/maintenance",
            json!({
                "id": "r9",
                "equipment_id": "E2",
                "performed_at": "2024-02-20T00:00:00Z",
                "outcome": "on_time"
            }),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn equipment_for_unknown_facility_is_not_found() {
    let app = build_test_app().await;
    let resp = app
        .post(
            "/equipment",
            json!({ "id": "E9", "facility_id": "nowhere", "equipment_type": "elevator" }),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["error"]["kind"], "facility_not_found");
}

#[tokio::test]
async fn invalid_facility_payload_reports_field() {
    let app = build_test_app().await;
    let resp = app
        .post("/facilities", json!({ "id": "bad:id", "name": "X", "organization_id": "acme" }))
        .await;

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(resp).await;
    assert_eq!(json["error"]["kind"], "validation_error");
    assert!(json["error"]["message"].as_str().unwrap().contains("id"));
}

#[tokio::test]
async fn unknown_equipment_type_is_rejected() {
    let app = build_test_app().await;
    let resp = app
        .post(
            "/equipment",
            json!({ "id": "E5", "facility_id": "F1", "equipment_type": "boiler" }),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn writes_are_persisted_to_the_database() {
    let app = build_test_app().await;
    let repository = app.state.repository.clone().unwrap();

    let mut rehydrated = FacilityStore::new();
    let summary = repository.load_into(&mut rehydrated).await.unwrap();

    assert_eq!(summary.facilities, 1);
    assert_eq!(summary.equipment, 1);
    assert_eq!(summary.maintenance_records, 2);
    assert_eq!(rehydrated.equipment("E1").unwrap().maintenance_records.len(), 2);
}

// ---- POST /cache/invalidate -------------------------------------------------

#[tokio::test]
async fn invalidate_by_prefix_reports_removed_count() {
    let app = build_test_app().await;
    app.get(&format!("/facilities/F1/metrics?{}", Q1)).await;
    app.get("/facilities/F1/metrics?start=2024-01-01T00:00:00Z&end=2024-01-31T00:00:00Z")
        .await;

    let resp = app
        .post("/cache/invalidate", json!({ "prefix": "facility:F1:" }))
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["removed"], 2);
}

#[tokio::test]
async fn invalidate_requires_key_or_prefix() {
    let app = build_test_app().await;
    let resp = app.post("/cache/invalidate", json!({})).await;

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// ---- GET /metrics -----------------------------------------------------------

#[tokio::test]
async fn metrics_endpoint_exposes_cache_and_http_counters() {
    let app = build_test_app().await;
    let uri = format!("/facilities/F1/metrics?{}", Q1);
    app.get(&uri).await;
    app.get(&uri).await;

    let resp = app.get("/metrics").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("masterbus_cache_hits_total 1"));
    assert!(text.contains("masterbus_aggregations_total 1"));
    assert!(text.contains("masterbus_http_requests_total"));
    assert!(text.contains("path=\"/facilities/:id/metrics\""));
}
