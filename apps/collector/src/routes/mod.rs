pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::samples::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root_handler))
        .route("/health", get(health::health_handler))
        // Ingestion
        .route("/locations/bulk", post(handlers::handle_bulk_upload))
        // Sample lookups
        .route("/samples", get(handlers::handle_list_samples))
        .route("/samples/count", get(handlers::handle_count_samples))
        .route(
            "/samples/device/:device_id",
            get(handlers::handle_device_samples),
        )
        .route(
            "/samples/server/:server_id",
            get(handlers::handle_get_sample_by_server_id),
        )
        .route("/samples/:client_id", get(handlers::handle_get_sample))
        // Processing and sync lifecycle
        .route("/processing/:server_id", post(handlers::handle_mark_processed))
        .route("/sync/pending", get(handlers::handle_pending_sync))
        .route(
            "/sync/:client_id/attempts",
            post(handlers::handle_sync_attempt),
        )
        .with_state(state)
}
