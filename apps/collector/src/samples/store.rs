use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::errors::AppError;
use crate::samples::models::{LocationSampleRow, NewLocationSample, SyncOutcome};

/// Upper bound on rows handed to a sync worker per `unsynced` call.
pub const MAX_UNSYNCED_BATCH: i64 = 1000;

/// Storage port for `location_samples`.
///
/// Implementations must uphold the table's invariants: `server_id` assigned
/// once at insert, `client_id` unique across all rows, and the sync
/// bookkeeping columns only ever moved through `record_sync_attempt*`.
///
/// Carried in `AppState` as `Arc<dyn SampleStore>`.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Stores a new sample with a fresh `server_id` and `received_at = now`.
    /// Returns `AppError::DuplicateClientId` if `client_id` is already stored.
    async fn insert(&self, sample: NewLocationSample) -> Result<LocationSampleRow, AppError>;

    async fn get(&self, server_id: Uuid) -> Result<LocationSampleRow, AppError>;

    async fn get_by_client_id(&self, client_id: &str) -> Result<LocationSampleRow, AppError>;

    async fn mark_processed(&self, server_id: Uuid) -> Result<LocationSampleRow, AppError>;

    /// Counts one sync attempt against the sample and applies its outcome.
    async fn record_sync_attempt(
        &self,
        client_id: &str,
        outcome: &SyncOutcome,
    ) -> Result<LocationSampleRow, AppError>;

    /// Like `record_sync_attempt`, but only when the stored `attempt_count`
    /// still equals `expected_attempt_count`. Returns `AppError::Conflict`
    /// otherwise, leaving the row untouched.
    async fn record_sync_attempt_if(
        &self,
        client_id: &str,
        expected_attempt_count: i32,
        outcome: &SyncOutcome,
    ) -> Result<LocationSampleRow, AppError>;

    /// Lazily streams a device's samples, oldest `received_at` first.
    /// Each call re-reads current state.
    fn samples_for_device<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxStream<'a, Result<LocationSampleRow, AppError>>;

    /// Up to `limit` samples with `sync = false`, fewest attempts first, then
    /// oldest first. `limit <= 0` returns no rows.
    async fn unsynced(&self, limit: i64) -> Result<Vec<LocationSampleRow>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;

    /// Newest-first page of all samples.
    async fn list_recent(&self, skip: i64, limit: i64)
        -> Result<Vec<LocationSampleRow>, AppError>;
}

/// Clamps a requested unsynced batch size into `0..=MAX_UNSYNCED_BATCH`.
/// A non-positive request yields an empty batch.
pub fn clamp_unsynced_limit(limit: i64) -> i64 {
    limit.clamp(0, MAX_UNSYNCED_BATCH)
}

/// Epoch milliseconds recorded in `synced_at_utc`.
pub fn sync_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn sample_not_found(key: impl std::fmt::Display) -> AppError {
    AppError::NotFound(format!("Sample {key} not found"))
}

pub(crate) fn stale_attempt(client_id: &str, expected: i32, actual: i32) -> AppError {
    AppError::Conflict(format!(
        "Sample {client_id} has attempt_count {actual}, expected {expected}"
    ))
}
