use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::samples::models::{LocationSampleRow, NewLocationSample, SyncOutcome};
use crate::samples::store::{
    clamp_unsynced_limit, sample_not_found, stale_attempt, sync_timestamp_ms, SampleStore,
};

/// Column list for reading `LocationSampleRow`s. The nullable bookkeeping
/// columns are folded back to their defaults.
macro_rules! sample_columns {
    () => {
        r#"server_id, client_id, lat, lon, acc, sample_date, sample_time,
           captured_at_utc, provider, freq, rf_pwr, comm_state, "user", station,
           device_id, received_at, processed,
           COALESCE(sync, false) AS sync,
           COALESCE(attempt_count, 0) AS attempt_count,
           last_error, synced_at_utc"#
    };
}

const INSERT_SAMPLE: &str = concat!(
    r#"
    INSERT INTO location_samples
        (server_id, client_id, lat, lon, acc, sample_date, sample_time,
         captured_at_utc, provider, freq, rf_pwr, comm_state, "user", station,
         device_id, received_at, processed, sync, attempt_count)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            (now() AT TIME ZONE 'utc'), false, false, 0)
    ON CONFLICT (client_id) DO NOTHING
    RETURNING "#,
    sample_columns!()
);

// $5 is the expected attempt_count, NULL for an unconditional attempt.
const RECORD_SYNC_ATTEMPT: &str = concat!(
    r#"
    UPDATE location_samples SET
        attempt_count = COALESCE(attempt_count, 0) + 1,
        sync          = CASE WHEN $2 THEN true ELSE COALESCE(sync, false) END,
        synced_at_utc = CASE WHEN $2 THEN $3 ELSE synced_at_utc END,
        last_error    = $4
    WHERE client_id = $1
      AND ($5::INTEGER IS NULL OR COALESCE(attempt_count, 0) = $5)
    RETURNING "#,
    sample_columns!()
);

/// `SampleStore` backed by the `location_samples` table in PostgreSQL.
#[derive(Clone)]
pub struct PgSampleStore {
    pool: PgPool,
}

impl PgSampleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_sync_attempt(
        &self,
        client_id: &str,
        expected_attempt_count: Option<i32>,
        outcome: &SyncOutcome,
    ) -> Result<LocationSampleRow, AppError> {
        let (succeeded, last_error) = match outcome {
            SyncOutcome::Success => (true, None),
            SyncOutcome::Failure { error } => (false, Some(error.as_str())),
        };

        let updated = sqlx::query_as::<_, LocationSampleRow>(RECORD_SYNC_ATTEMPT)
            .bind(client_id)
            .bind(succeeded)
            .bind(sync_timestamp_ms())
            .bind(last_error)
            .bind(expected_attempt_count)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            debug!(
                client_id,
                attempt_count = row.attempt_count,
                sync = row.sync,
                "Recorded sync attempt"
            );
            return Ok(row);
        }

        // Nothing matched: either the sample is unknown or the guard failed.
        let current = self.get_by_client_id(client_id).await?;
        match expected_attempt_count {
            Some(expected) => Err(stale_attempt(client_id, expected, current.attempt_count)),
            None => Err(sample_not_found(client_id)),
        }
    }
}

fn map_insert_error(client_id: &str, error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::DuplicateClientId(client_id.to_string())
        }
        _ => AppError::Database(error),
    }
}

#[async_trait]
impl SampleStore for PgSampleStore {
    async fn insert(&self, sample: NewLocationSample) -> Result<LocationSampleRow, AppError> {
        let inserted = sqlx::query_as::<_, LocationSampleRow>(INSERT_SAMPLE)
            .bind(Uuid::new_v4())
            .bind(&sample.client_id)
            .bind(sample.lat)
            .bind(sample.lon)
            .bind(sample.acc)
            .bind(&sample.sample_date)
            .bind(&sample.sample_time)
            .bind(sample.captured_at_utc)
            .bind(&sample.provider)
            .bind(&sample.freq)
            .bind(&sample.rf_pwr)
            .bind(&sample.comm_state)
            .bind(&sample.user)
            .bind(&sample.station)
            .bind(&sample.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_insert_error(&sample.client_id, e))?;

        // ON CONFLICT DO NOTHING returns no row for a duplicate client_id.
        inserted.ok_or(AppError::DuplicateClientId(sample.client_id))
    }

    async fn get(&self, server_id: Uuid) -> Result<LocationSampleRow, AppError> {
        sqlx::query_as::<_, LocationSampleRow>(concat!(
            "SELECT ",
            sample_columns!(),
            " FROM location_samples WHERE server_id = $1"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| sample_not_found(server_id))
    }

    async fn get_by_client_id(&self, client_id: &str) -> Result<LocationSampleRow, AppError> {
        sqlx::query_as::<_, LocationSampleRow>(concat!(
            "SELECT ",
            sample_columns!(),
            " FROM location_samples WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| sample_not_found(client_id))
    }

    async fn mark_processed(&self, server_id: Uuid) -> Result<LocationSampleRow, AppError> {
        sqlx::query_as::<_, LocationSampleRow>(concat!(
            "UPDATE location_samples SET processed = true WHERE server_id = $1 RETURNING ",
            sample_columns!()
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| sample_not_found(server_id))
    }

    async fn record_sync_attempt(
        &self,
        client_id: &str,
        outcome: &SyncOutcome,
    ) -> Result<LocationSampleRow, AppError> {
        self.apply_sync_attempt(client_id, None, outcome).await
    }

    async fn record_sync_attempt_if(
        &self,
        client_id: &str,
        expected_attempt_count: i32,
        outcome: &SyncOutcome,
    ) -> Result<LocationSampleRow, AppError> {
        self.apply_sync_attempt(client_id, Some(expected_attempt_count), outcome)
            .await
    }

    fn samples_for_device<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxStream<'a, Result<LocationSampleRow, AppError>> {
        sqlx::query_as::<_, LocationSampleRow>(concat!(
            "SELECT ",
            sample_columns!(),
            " FROM location_samples WHERE device_id = $1 ORDER BY received_at ASC, seq ASC"
        ))
        .bind(device_id)
        .fetch(&self.pool)
        .map_err(AppError::from)
        .boxed()
    }

    async fn unsynced(&self, limit: i64) -> Result<Vec<LocationSampleRow>, AppError> {
        Ok(sqlx::query_as::<_, LocationSampleRow>(concat!(
            "SELECT ",
            sample_columns!(),
            r#" FROM location_samples
                WHERE sync IS NOT TRUE
                ORDER BY COALESCE(attempt_count, 0) ASC, received_at ASC, seq ASC
                LIMIT $1"#
        ))
        .bind(clamp_unsynced_limit(limit))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM location_samples")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_recent(
        &self,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<LocationSampleRow>, AppError> {
        Ok(sqlx::query_as::<_, LocationSampleRow>(concat!(
            "SELECT ",
            sample_columns!(),
            " FROM location_samples ORDER BY received_at DESC, seq DESC OFFSET $1 LIMIT $2"
        ))
        .bind(skip.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?)
    }
}
