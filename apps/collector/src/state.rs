use std::sync::Arc;

use crate::config::Config;
use crate::samples::store::SampleStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL-backed in production, in-memory without `DATABASE_URL`.
    pub store: Arc<dyn SampleStore>,
    pub config: Config,
}
