use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, AppJson};
use crate::samples::ingest::{ingest_batch, BulkUploadRequest, BulkUploadResponse};
use crate::samples::models::{LocationSampleRow, SyncOutcome};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 100;
const DEFAULT_UNSYNCED_BATCH: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_page_size")]
    pub limit: i64,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SamplePage {
    pub total: usize,
    pub skip: i64,
    pub limit: i64,
    pub samples: Vec<LocationSampleRow>,
}

#[derive(Debug, Serialize)]
pub struct DeviceSamplePage {
    pub device_id: String,
    pub total_found: usize,
    pub skip: i64,
    pub limit: i64,
    pub samples: Vec<LocationSampleRow>,
}

#[derive(Debug, Serialize)]
pub struct SampleCount {
    pub total_samples: i64,
}

#[derive(Debug, Deserialize)]
pub struct SyncAttemptRequest {
    #[serde(flatten)]
    pub outcome: SyncOutcome,
    /// Guard for concurrent sync workers: apply only if unchanged.
    pub expected_attempt_count: Option<i32>,
}

/// POST /locations/bulk
pub async fn handle_bulk_upload(
    State(state): State<AppState>,
    AppJson(req): AppJson<BulkUploadRequest>,
) -> Result<(StatusCode, Json<BulkUploadResponse>), AppError> {
    let outcome = ingest_batch(
        state.store.as_ref(),
        &req.device_id,
        req.samples,
        state.config.max_batch_size,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(outcome.into_response())))
}

/// GET /samples
pub async fn handle_list_samples(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<SamplePage>, AppError> {
    let samples = state.store.list_recent(page.skip, page.limit).await?;
    Ok(Json(SamplePage {
        total: samples.len(),
        skip: page.skip,
        limit: page.limit,
        samples,
    }))
}

/// GET /samples/count
pub async fn handle_count_samples(
    State(state): State<AppState>,
) -> Result<Json<SampleCount>, AppError> {
    let total_samples = state.store.count().await?;
    Ok(Json(SampleCount { total_samples }))
}

/// GET /samples/device/:device_id
pub async fn handle_device_samples(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<DeviceSamplePage>, AppError> {
    let samples: Vec<LocationSampleRow> = state
        .store
        .samples_for_device(&device_id)
        .skip(page.skip.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .try_collect()
        .await?;

    Ok(Json(DeviceSamplePage {
        total_found: samples.len(),
        device_id,
        skip: page.skip,
        limit: page.limit,
        samples,
    }))
}

/// GET /samples/:client_id
pub async fn handle_get_sample(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<LocationSampleRow>, AppError> {
    Ok(Json(state.store.get_by_client_id(&client_id).await?))
}

/// GET /samples/server/:server_id
pub async fn handle_get_sample_by_server_id(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<LocationSampleRow>, AppError> {
    Ok(Json(state.store.get(server_id).await?))
}

/// GET /sync/pending
pub async fn handle_pending_sync(
    State(state): State<AppState>,
    Query(params): Query<PendingQuery>,
) -> Result<Json<Vec<LocationSampleRow>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_UNSYNCED_BATCH);
    Ok(Json(state.store.unsynced(limit).await?))
}

/// POST /sync/:client_id/attempts
pub async fn handle_sync_attempt(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    AppJson(req): AppJson<SyncAttemptRequest>,
) -> Result<Json<LocationSampleRow>, AppError> {
    let row = match req.expected_attempt_count {
        Some(expected) => {
            state
                .store
                .record_sync_attempt_if(&client_id, expected, &req.outcome)
                .await?
        }
        None => {
            state
                .store
                .record_sync_attempt(&client_id, &req.outcome)
                .await?
        }
    };
    Ok(Json(row))
}

/// POST /processing/:server_id
pub async fn handle_mark_processed(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<LocationSampleRow>, AppError> {
    Ok(Json(state.store.mark_processed(server_id).await?))
}
