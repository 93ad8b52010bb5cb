use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use school_admissions::workflows::admissions::{
    admissions_router, AdmissionsService, AdmissionsStore, NotificationDispatcher,
    SchedulingPolicy,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_admissions_routes<S, N>(service: Arc<AdmissionsService<S, N>>) -> axum::Router
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    let policy = service.policy().clone();
    admissions_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route(
            "/api/v1/admissions/policy",
            axum::routing::get(move || policy_endpoint(policy.clone())),
        )
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Scheduling dials the running service was started with.
pub(crate) async fn policy_endpoint(policy: SchedulingPolicy) -> Json<SchedulingPolicy> {
    Json(policy)
}
