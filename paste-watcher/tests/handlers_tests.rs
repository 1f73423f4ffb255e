use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use chrono::Utc;
use reqwest::StatusCode;

use paste_watcher::{
    handlers,
    poller::{CycleOutcome, CycleStats, PollerState},
};

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

#[tokio::test]
async fn test_index_and_readiness() {
    let state = Arc::new(PollerState::new(Duration::from_secs(30)));
    let addr = spawn_app(handlers::app(state, None)).await;

    for path in ["/", "/_readiness"] {
        let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "paste watcher");
    }
}

#[tokio::test]
async fn test_unknown_route_passes_through_middleware() {
    let state = Arc::new(PollerState::new(Duration::from_secs(30)));
    let addr = spawn_app(handlers::app(state, None)).await;

    let response = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let state = Arc::new(PollerState::new(Duration::from_secs(30)));
    let addr = spawn_app(handlers::app(state, None)).await;

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        "no metrics recorder installed"
    );
}

#[tokio::test]
async fn test_liveness_follows_poll_loop() {
    let state = Arc::new(PollerState::new(Duration::from_secs(30)));
    let addr = spawn_app(handlers::app(state.clone(), None)).await;
    let url = format!("http://{addr}/_liveness");

    // Fresh start is within the deadline
    assert_eq!(reqwest::get(&url).await.unwrap().status(), StatusCode::OK);

    // Last report long ago
    state
        .record(CycleOutcome::Skipped, 0, Utc::now() - chrono::Duration::minutes(10))
        .await;
    assert_eq!(
        reqwest::get(&url).await.unwrap().status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    state.record(CycleOutcome::Skipped, 0, Utc::now()).await;
    assert_eq!(reqwest::get(&url).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_reports_last_cycle() {
    let state = Arc::new(PollerState::new(Duration::from_secs(30)));
    let addr = spawn_app(handlers::app(state.clone(), None)).await;

    let stats = CycleStats {
        fetched: 4,
        processed: 3,
        duplicates: 1,
        failed: 0,
    };
    state
        .record(CycleOutcome::Completed(stats), 3, Utc::now())
        .await;

    let status: serde_json::Value = reqwest::get(format!("http://{addr}/_status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(status["cycles"], 1);
    assert_eq!(status["skipped"], 0);
    assert_eq!(status["cache_size"], 3);
    assert_eq!(status["last_outcome"]["status"], "completed");
    assert_eq!(status["last_outcome"]["processed"], 3);
    assert!(status["last_run"].is_string());
}
