//! HTTP router and handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, warn};

use crate::gate::AdmissionGate;
use crate::metrics::{self, MetricsExporter};
use crate::mutation::{AdmissionReview, MutationEngine};
use crate::snapshot::SnapshotProvider;

/// Largest admission review accepted on `/mutate`
const MAX_REVIEW_BYTES: usize = 8 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    /// Admission decisions
    pub engine: MutationEngine,
    /// Per-request budget for `/mutate`
    pub gate: Arc<AdmissionGate>,
    /// Variables used for readiness
    pub snapshot: Arc<dyn SnapshotProvider>,
    /// `/metrics` renderer
    pub metrics: MetricsExporter,
}

impl AppState {
    /// State with an engine reading from `snapshot`
    pub fn new(
        snapshot: Arc<dyn SnapshotProvider>,
        gate: Arc<AdmissionGate>,
        metrics: MetricsExporter,
    ) -> Self {
        Self {
            engine: MutationEngine::new(Arc::clone(&snapshot)),
            gate,
            snapshot,
            metrics,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let gate = Arc::clone(&state.gate);

    Router::new()
        .route(
            "/mutate",
            post(mutate_handler)
                .layer(DefaultBodyLimit::max(MAX_REVIEW_BYTES))
                .layer(middleware::from_fn_with_state(gate, admission_gate)),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

/// Turn requests away with 429 once the budget is spent
async fn admission_gate(
    State(gate): State<Arc<AdmissionGate>>,
    request: Request,
    next: Next,
) -> Response {
    if !gate.try_acquire() {
        warn!(rate = gate.rate().get(), "Rate limit exceeded");
        metrics::record_rate_limited();
        return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    }
    next.run(request).await
}

/// POST /mutate
async fn mutate_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let started = Instant::now();

    let decoded = match MutationEngine::decode(&body) {
        Ok(decoded) => decoded,
        Err(e) => {
            error!(error = %e, "Could not decode admission review");
            metrics::record_error(e.metric_label());
            return (e.status_code(), e.to_string()).into_response();
        }
    };

    let kind = decoded.request.kind.kind.as_str();
    let operation = decoded.request.operation.as_str();
    metrics::record_request(kind, operation);

    let response = match state.engine.admit(&decoded.request) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %decoded.request.uid, error = %e, "Admission request rejected");
            metrics::record_error(e.metric_label());
            return (e.status_code(), e.to_string()).into_response();
        }
    };

    if response.patch.is_some() {
        metrics::record_mutation(kind);
    }
    metrics::record_duration(kind, operation, started.elapsed());
    debug!(uid = %response.uid, patched = response.patch.is_some(), "Admission response sent");

    Json(AdmissionReview::reply(&decoded.api_version, response)).into_response()
}

/// GET /health
async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Readiness {
    status: &'static str,
    config_loaded: bool,
    timestamp: String,
}

/// GET /ready
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config_loaded = !state.snapshot.current().is_empty();
    let (status, label) = if config_loaded {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    };

    (
        status,
        Json(Readiness {
            status: label,
            config_loaded,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
    )
}

/// GET /metrics
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::snapshot::ConfigSnapshot;

    fn router(vars: &[(&str, &str)], rate: u32) -> Router {
        let snapshot: Arc<dyn SnapshotProvider> =
            Arc::new(Arc::new(ConfigSnapshot::new(vars.iter().copied())));
        let gate = Arc::new(AdmissionGate::new(NonZeroU32::new(rate).unwrap()));
        create_router(Arc::new(AppState::new(
            snapshot,
            gate,
            MetricsExporter::disabled(),
        )))
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Bytes) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (status, body) = get(router(&[], 1), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn ready_reflects_snapshot() {
        let (status, body) = get(router(&[("A", "1")], 1), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "Ready");
        assert_eq!(json["configLoaded"], true);
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());

        let (status, body) = get(router(&[], 1), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "Not Ready");
        assert_eq!(json["configLoaded"], false);
    }

    #[tokio::test]
    async fn health_checks_are_not_rate_limited() {
        let app = router(&[("A", "1")], 1);
        for _ in 0..5 {
            let (status, _) = get(app.clone(), "/health").await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let response = router(&[], 1)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn metrics_endpoint_is_text() {
        let response = router(&[], 1)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }
}
