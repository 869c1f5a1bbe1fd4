//! Tests for the aggregation HTTP API
#![cfg(feature = "api")]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use coinprice::api::create_router;
use coinprice::config::EngineConfig;
use coinprice::orchestrator::{AggregationOrchestrator, AggregationResponse, FixedClock};
use coinprice::sources::MemoryStore;
use coinprice::types::{Grade, PriceObservation};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tower::ServiceExt;

fn router_with(observations: Vec<PriceObservation>) -> axum::Router {
    let store = Arc::new(MemoryStore::with_observations(observations));
    let as_of = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let orchestrator = AggregationOrchestrator::with_clock(
        store.clone(),
        store,
        &EngineConfig::default(),
        Arc::new(FixedClock(as_of)),
    );
    create_router(Arc::new(orchestrator))
}

fn aggregate_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/aggregate")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_response(response: axum::response::Response) -> AggregationResponse {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn aggregate_returns_counts_on_success() {
    let app = router_with(vec![PriceObservation {
        item_id: "1909-s-vdb".to_string(),
        source_name: "heritage".to_string(),
        grade: Grade::Graded("MS-64".to_string()),
        price: dec!(1450),
        sale_date: None,
        source_reliability: dec!(0.9),
        observation_confidence: dec!(0.9),
    }]);

    let response = app
        .oneshot(aggregate_request(r#"{"item_id":"1909-s-vdb"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_response(response).await;
    assert!(body.success);
    assert_eq!(body.grades_processed, Some(1));
    assert_eq!(body.total_observations, Some(1));
}

#[tokio::test]
async fn aggregate_unknown_item_is_not_found() {
    let app = router_with(Vec::new());

    let response = app
        .oneshot(aggregate_request(r#"{"item_id":"nope"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = read_response(response).await;
    assert!(!body.success);
    assert!(body.error.unwrap().contains("nope"));
}

#[tokio::test]
async fn aggregate_rejects_blank_item_id() {
    let app = router_with(Vec::new());

    let response = app
        .oneshot(aggregate_request(r#"{"item_id":"  "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_ok() {
    let app = router_with(Vec::new());
    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
