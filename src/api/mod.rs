//! Aggregation HTTP API
//!
//! Lets a scheduler trigger runs over HTTP.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::orchestrator::{
    AggregationError, AggregationOrchestrator, AggregationRequest, AggregationResponse,
};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Create the API router with all endpoints
pub fn create_router(orchestrator: Arc<AggregationOrchestrator>) -> Router {
    Router::new()
        .route("/api/aggregate", post(aggregate))
        .route("/api/health", get(health))
        .with_state(orchestrator)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// POST /api/aggregate - Run aggregation for one item
async fn aggregate(
    State(orchestrator): State<Arc<AggregationOrchestrator>>,
    Json(request): Json<AggregationRequest>,
) -> impl IntoResponse {
    if request.item_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(AggregationResponse::error("item_id is required", None)),
        );
    }

    let result = orchestrator.run(&request.item_id).await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(AggregationError::NotFound(_)) => StatusCode::NOT_FOUND,
        Err(AggregationError::Fetch { .. }) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(AggregationResponse::from_result(&result)))
}

/// GET /api/health
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Start the API server
pub async fn start_server(orchestrator: Arc<AggregationOrchestrator>, port: u16) -> anyhow::Result<()> {
    let app = create_router(orchestrator);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("Aggregation API starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
