mod health;
mod metrics;
mod upload;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/upload", post(upload::upload_direct))
        .route("/upload/direct", post(upload::upload_direct))
        .route("/upload/isolated", post(upload::upload_isolated))
        .route("/upload/queued", post(upload::upload_queued))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
