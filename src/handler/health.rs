use crate::service::HealthAggregator;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::Arc;

/// Handler for GET /health
pub async fn health_handler(State(aggregator): State<Arc<HealthAggregator>>) -> impl IntoResponse {
    let (snapshot, status) = aggregator.check().await;
    (status, Json(snapshot))
}
