use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::samples::models::SamplePayload;
use crate::samples::store::SampleStore;
use crate::samples::validation::validate_sample;

#[derive(Debug, Deserialize)]
pub struct BulkUploadRequest {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub samples: Vec<SamplePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedSample {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkUploadResponse {
    pub status: String,
    pub message: String,
    /// Client ids the device may now mark as synced: new inserts and samples
    /// that were already stored.
    pub synced_ids: Vec<String>,
    pub failed: Vec<FailedSample>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of ingesting one device batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub synced_ids: Vec<String>,
    pub failed: Vec<FailedSample>,
}

impl BatchOutcome {
    pub fn into_response(self) -> BulkUploadResponse {
        BulkUploadResponse {
            status: "success".to_string(),
            message: format!(
                "Processed {} samples successfully, {} failed",
                self.synced_ids.len(),
                self.failed.len()
            ),
            synced_ids: self.synced_ids,
            failed: self.failed,
            timestamp: Utc::now(),
        }
    }
}

/// Ingests a batch of samples uploaded by one device.
///
/// Samples are validated and inserted one at a time. A duplicate `client_id`
/// means the sample was ingested on an earlier attempt, so it is acknowledged
/// like a fresh insert. Invalid samples are reported in `failed` without
/// aborting the batch. A blank `deviceId` or an oversized batch rejects the
/// whole request before anything is stored.
///
/// Any other store error aborts the batch, but samples inserted before it stay
/// committed. The device retries the whole batch, and the retry acknowledges
/// those samples as duplicates.
pub async fn ingest_batch(
    store: &dyn SampleStore,
    device_id: &str,
    samples: Vec<SamplePayload>,
    max_batch_size: usize,
) -> Result<BatchOutcome, AppError> {
    if device_id.trim().is_empty() {
        return Err(AppError::Validation(
            "missing required field 'deviceId'".to_string(),
        ));
    }

    if samples.len() > max_batch_size {
        return Err(AppError::Validation(format!(
            "Too many samples. Maximum {max_batch_size} per request, got {}",
            samples.len()
        )));
    }

    info!(
        "Received bulk upload from device {device_id} with {} samples",
        samples.len()
    );

    let mut outcome = BatchOutcome::default();
    for payload in samples {
        let id = payload
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let sample = match validate_sample(payload, device_id) {
            Ok(sample) => sample,
            Err(AppError::Validation(error)) => {
                warn!("Rejected sample {id} from device {device_id}: {error}");
                outcome.failed.push(FailedSample { id, error });
                continue;
            }
            Err(other) => return Err(other),
        };

        match store.insert(sample).await {
            Ok(row) => {
                outcome.inserted += 1;
                outcome.synced_ids.push(row.client_id);
            }
            Err(AppError::DuplicateClientId(client_id)) => {
                warn!("Sample {client_id} already exists - skipping");
                outcome.duplicates += 1;
                outcome.synced_ids.push(client_id);
            }
            Err(other) => return Err(other),
        }
    }

    info!(
        "Bulk upload completed for device {device_id}: {} inserted, {} duplicates, {} failed",
        outcome.inserted,
        outcome.duplicates,
        outcome.failed.len()
    );
    Ok(outcome)
}
