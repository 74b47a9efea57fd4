use crate::handler::health::health_handler;
use crate::handler::ingest::log_handler;
use crate::service::{HealthAggregator, Publisher};
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Build the producer router (ingest + health).
pub fn producer_router(publisher: Arc<Publisher>, health: Arc<HealthAggregator>) -> Router {
    let health_router = Router::new()
        .route("/health", get(health_handler))
        .with_state(health);

    let log_router = Router::new()
        .route("/log", post(log_handler))
        .with_state(publisher);

    Router::new().merge(health_router).merge(log_router)
}
