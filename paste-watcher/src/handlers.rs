use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::{metrics, poller::PollerState};

pub fn app(state: Arc<PollerState>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(liveness))
        .route("/_status", routing::get(status))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .layer(axum::middleware::from_fn(metrics::track_metrics))
        .with_state(state)
}

pub async fn index() -> &'static str {
    "paste watcher"
}

async fn liveness(State(state): State<Arc<PollerState>>) -> Response {
    if state.is_alive(Utc::now()).await {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "poll loop stalled").into_response()
    }
}

async fn status(State(state): State<Arc<PollerState>>) -> Response {
    Json(state.snapshot().await).into_response()
}
