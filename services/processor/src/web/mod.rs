pub mod rest;
pub mod state;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Builds the HTTP surface of the processor.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/documents", post(rest::ingest_handler))
        .route("/documents/{id}", get(rest::get_document_handler))
        .route("/documents/{id}/reprocess", post(rest::reprocess_handler))
        .route("/documents/{id}/logs", get(rest::document_logs_handler))
        .route("/providers", get(rest::providers_handler))
        .route("/stats", get(rest::stats_handler))
        .with_state(app_state)
}
