use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored row of `location_samples`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LocationSampleRow {
    pub server_id: Uuid,
    pub client_id: String,
    pub lat: f64,
    pub lon: f64,
    pub acc: f64,
    pub sample_date: String,
    pub sample_time: String,
    pub captured_at_utc: i64,
    pub provider: String,
    pub freq: String,
    pub rf_pwr: String,
    pub comm_state: String,
    pub user: String,
    pub station: String,
    pub device_id: String,
    pub received_at: NaiveDateTime,
    pub processed: bool,
    pub sync: bool,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub synced_at_utc: Option<i64>,
}

impl LocationSampleRow {
    /// Builds the initial state of a freshly ingested sample: unprocessed,
    /// unsynced, no attempts.
    pub fn ingested(sample: NewLocationSample, server_id: Uuid, received_at: NaiveDateTime) -> Self {
        let NewLocationSample {
            client_id,
            lat,
            lon,
            acc,
            sample_date,
            sample_time,
            captured_at_utc,
            provider,
            freq,
            rf_pwr,
            comm_state,
            user,
            station,
            device_id,
        } = sample;

        Self {
            server_id,
            client_id,
            lat,
            lon,
            acc,
            sample_date,
            sample_time,
            captured_at_utc,
            provider,
            freq,
            rf_pwr,
            comm_state,
            user,
            station,
            device_id,
            received_at,
            processed: false,
            sync: false,
            attempt_count: 0,
            last_error: None,
            synced_at_utc: None,
        }
    }

    /// Applies one sync attempt to the bookkeeping columns.
    pub fn apply_sync_attempt(&mut self, outcome: &SyncOutcome, now_ms: i64) {
        self.attempt_count += 1;
        match outcome {
            SyncOutcome::Success => {
                self.sync = true;
                self.synced_at_utc = Some(now_ms);
                self.last_error = None;
            }
            // A failure never un-syncs a sample that already made it downstream.
            SyncOutcome::Failure { error } => {
                self.last_error = Some(error.clone());
            }
        }
    }
}

/// A validated sample ready for insertion. Server-owned columns are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocationSample {
    pub client_id: String,
    pub lat: f64,
    pub lon: f64,
    pub acc: f64,
    pub sample_date: String,
    pub sample_time: String,
    pub captured_at_utc: i64,
    pub provider: String,
    pub freq: String,
    pub rf_pwr: String,
    pub comm_state: String,
    pub user: String,
    pub station: String,
    pub device_id: String,
}

/// A sample as uploaded by a device. Every field is optional on the wire so
/// that a missing column surfaces as a validation error naming it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplePayload {
    /// Client-generated sample id, stored as `client_id`.
    pub id: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub acc: Option<f64>,
    pub sample_date: Option<String>,
    pub sample_time: Option<String>,
    pub captured_at_utc: Option<i64>,
    pub provider: Option<String>,
    pub freq: Option<String>,
    pub rf_pwr: Option<String>,
    pub comm_state: Option<String>,
    pub user: Option<String>,
    pub station: Option<String>,
    // Device-side sync bookkeeping. Accepted for compatibility, never stored.
    pub sync: Option<bool>,
    pub attempt_count: Option<i32>,
    pub last_error: Option<String>,
    pub synced_at_utc: Option<i64>,
}

/// Result of propagating one sample to the downstream system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failure { error: String },
}
