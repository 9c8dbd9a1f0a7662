//! HTTP surface of the metrics service.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /metrics`
//! - `GET  /facilities/:id/metrics?start=&end=`
//! - `GET  /organizations/:id/metrics?start=&end=`
//! - `POST /facilities`
//! - `POST /equipment`
//! - `POST /equipment/:id/maintenance`
//! - `POST /cache/invalidate`

pub mod cache;
pub mod equipment;
pub mod error;
pub mod facilities;
pub mod headers;
pub mod health;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::aggregation::{MetricsService, TimeWindow};
use crate::error::MasterBusError;
use crate::metrics::AppMetrics;
use crate::repository::FacilityRepository;
use crate::store::FacilityStore;

pub use error::ApiError;
use headers::{cache_control, compute_etag, if_none_match_matches};

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub service: MetricsService,
    /// Same store the aggregator reads from.
    pub store: Arc<RwLock<FacilityStore>>,
    /// Present when a database is configured.
    pub repository: Option<Arc<FacilityRepository>>,
    pub metrics: Arc<AppMetrics>,
}

/// Assemble the full router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/facilities", post(facilities::create_facility))
        .route("/facilities/:id/metrics", get(facilities::facility_metrics))
        .route(
            "/organizations/:id/metrics",
            get(facilities::organization_metrics),
        )
        .route("/equipment", post(equipment::create_equipment))
        .route(
            "/equipment/:id/maintenance",
            post(equipment::record_maintenance),
        )
        .route("/cache/invalidate", post(cache::invalidate))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_http,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Record request count and latency. The path label is the matched route
/// template, so ids do not multiply label values.
async fn track_http(
    State(metrics): State<Arc<AppMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();

    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    metrics
        .http_request_duration
        .observe(elapsed.as_secs_f64());

    tracing::debug!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Request handled"
    );

    response
}

/// Optional `start` / `end` query bounds.
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl WindowQuery {
    /// `None` when neither bound is given, so the service applies its
    /// default window. A single bound is completed with the default
    /// window length: a missing `end` lies after `start`, a missing
    /// `start` lies before `end`.
    pub fn resolve(&self, service: &MetricsService) -> Result<Option<TimeWindow>, MasterBusError> {
        let length = service.aggregator().get_config().default_window;
        let window = match (self.start, self.end) {
            (None, None) => return Ok(None),
            (Some(start), Some(end)) => TimeWindow { start, end },
            (Some(start), None) => TimeWindow {
                start,
                end: start
                    .checked_add_signed(length)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
            (None, Some(end)) => TimeWindow {
                start: end
                    .checked_sub_signed(length)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
                end,
            },
        };
        window.validate()?;
        Ok(Some(window))
    }
}

/// Serialize `payload` with an ETag and `Cache-Control` derived from the
/// cache TTL, answering `304 Not Modified` when the client already has it.
pub(crate) fn cached_json<T: Serialize>(
    state: &AppState,
    request_headers: &HeaderMap,
    payload: &T,
) -> Result<Response, ApiError> {
    let body = serde_json::to_vec(payload)?;
    let etag = compute_etag(&body);
    let cache_control = cache_control(state.service.cache_settings().ttl);

    if if_none_match_matches(request_headers, &etag) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::CACHE_CONTROL, cache_control)],
            [(header::ETAG, etag)],
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CACHE_CONTROL, cache_control),
        ],
        [(header::ETAG, etag)],
        Body::from(body),
    )
        .into_response())
}
