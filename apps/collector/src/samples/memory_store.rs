//! In-process `SampleStore`, used when no `DATABASE_URL` is configured.
//!
//! Rows are kept in insertion order with hash indexes on `server_id` and
//! `client_id`. A single `RwLock` serialises writers, which makes every
//! operation atomic with respect to the others.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::samples::models::{LocationSampleRow, NewLocationSample, SyncOutcome};
use crate::samples::store::{
    clamp_unsynced_limit, sample_not_found, stale_attempt, sync_timestamp_ms, SampleStore,
};

#[derive(Default)]
struct Table {
    rows: Vec<LocationSampleRow>,
    by_server_id: HashMap<Uuid, usize>,
    by_client_id: HashMap<String, usize>,
}

impl Table {
    fn position_by_client_id(&self, client_id: &str) -> Result<usize, AppError> {
        self.by_client_id
            .get(client_id)
            .copied()
            .ok_or_else(|| sample_not_found(client_id))
    }
}

#[derive(Default)]
pub struct MemorySampleStore {
    table: RwLock<Table>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn insert(&self, sample: NewLocationSample) -> Result<LocationSampleRow, AppError> {
        let mut table = self.table.write().await;
        if table.by_client_id.contains_key(&sample.client_id) {
            return Err(AppError::DuplicateClientId(sample.client_id));
        }

        let server_id = Uuid::new_v4();
        let row = LocationSampleRow::ingested(sample, server_id, Utc::now().naive_utc());
        let position = table.rows.len();
        table.by_server_id.insert(server_id, position);
        table.by_client_id.insert(row.client_id.clone(), position);
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn get(&self, server_id: Uuid) -> Result<LocationSampleRow, AppError> {
        let table = self.table.read().await;
        table
            .by_server_id
            .get(&server_id)
            .map(|&i| table.rows[i].clone())
            .ok_or_else(|| sample_not_found(server_id))
    }

    async fn get_by_client_id(&self, client_id: &str) -> Result<LocationSampleRow, AppError> {
        let table = self.table.read().await;
        let position = table.position_by_client_id(client_id)?;
        Ok(table.rows[position].clone())
    }

    async fn mark_processed(&self, server_id: Uuid) -> Result<LocationSampleRow, AppError> {
        let mut table = self.table.write().await;
        let position = *table
            .by_server_id
            .get(&server_id)
            .ok_or_else(|| sample_not_found(server_id))?;
        let row = &mut table.rows[position];
        row.processed = true;
        Ok(row.clone())
    }

    async fn record_sync_attempt(
        &self,
        client_id: &str,
        outcome: &SyncOutcome,
    ) -> Result<LocationSampleRow, AppError> {
        let mut table = self.table.write().await;
        let position = table.position_by_client_id(client_id)?;
        let row = &mut table.rows[position];
        row.apply_sync_attempt(outcome, sync_timestamp_ms());
        Ok(row.clone())
    }

    async fn record_sync_attempt_if(
        &self,
        client_id: &str,
        expected_attempt_count: i32,
        outcome: &SyncOutcome,
    ) -> Result<LocationSampleRow, AppError> {
        let mut table = self.table.write().await;
        let position = table.position_by_client_id(client_id)?;
        let row = &mut table.rows[position];
        if row.attempt_count != expected_attempt_count {
            return Err(stale_attempt(
                client_id,
                expected_attempt_count,
                row.attempt_count,
            ));
        }
        row.apply_sync_attempt(outcome, sync_timestamp_ms());
        Ok(row.clone())
    }

    fn samples_for_device<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxStream<'a, Result<LocationSampleRow, AppError>> {
        stream::once(async move {
            let table = self.table.read().await;
            let mut rows: Vec<LocationSampleRow> = table
                .rows
                .iter()
                .filter(|r| r.device_id == device_id)
                .cloned()
                .collect();
            // Stable sort: insertion order breaks received_at ties.
            rows.sort_by_key(|r| r.received_at);
            stream::iter(rows.into_iter().map(Ok))
        })
        .flatten()
        .boxed()
    }

    async fn unsynced(&self, limit: i64) -> Result<Vec<LocationSampleRow>, AppError> {
        let limit = clamp_unsynced_limit(limit) as usize;
        let table = self.table.read().await;
        let mut pending: Vec<&LocationSampleRow> = table.rows.iter().filter(|r| !r.sync).collect();
        pending.sort_by_key(|r| (r.attempt_count, r.received_at));
        Ok(pending.into_iter().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(self.table.read().await.rows.len() as i64)
    }

    async fn list_recent(
        &self,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<LocationSampleRow>, AppError> {
        let table = self.table.read().await;
        let mut rows: Vec<&LocationSampleRow> = table.rows.iter().collect();
        // Reverse first so that the stable sort keeps later inserts ahead on ties.
        rows.reverse();
        rows.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(rows
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::fixtures::new_sample;
    use futures::TryStreamExt;

    fn failure(msg: &str) -> SyncOutcome {
        SyncOutcome::Failure {
            error: msg.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_then_get_round_trips_every_field() {
        let store = MemorySampleStore::new();
        let sample = new_sample("dev-42-0001", "dev-42");
        let inserted = store.insert(sample.clone()).await.unwrap();

        let loaded = store.get(inserted.server_id).await.unwrap();
        assert_eq!(loaded, inserted);
        assert_eq!(loaded.client_id, sample.client_id);
        assert_eq!(loaded.lat, sample.lat);
        assert_eq!(loaded.lon, sample.lon);
        assert_eq!(loaded.acc, sample.acc);
        assert_eq!(loaded.sample_date, sample.sample_date);
        assert_eq!(loaded.sample_time, sample.sample_time);
        assert_eq!(loaded.captured_at_utc, sample.captured_at_utc);
        assert_eq!(loaded.provider, sample.provider);
        assert_eq!(loaded.freq, sample.freq);
        assert_eq!(loaded.rf_pwr, sample.rf_pwr);
        assert_eq!(loaded.comm_state, sample.comm_state);
        assert_eq!(loaded.user, sample.user);
        assert_eq!(loaded.station, sample.station);
        assert_eq!(loaded.device_id, sample.device_id);
    }

    #[tokio::test]
    async fn test_new_sample_defaults() {
        let store = MemorySampleStore::new();
        let row = store.insert(new_sample("dev-42-0001", "dev-42")).await.unwrap();
        assert!(!row.sync);
        assert!(!row.processed);
        assert_eq!(row.attempt_count, 0);
        assert_eq!(row.last_error, None);
        assert_eq!(row.synced_at_utc, None);
    }

    #[tokio::test]
    async fn test_duplicate_client_id_rejected_and_single_row_kept() {
        let store = MemorySampleStore::new();
        let first = store.insert(new_sample("dev-42-0001", "dev-42")).await.unwrap();

        let err = store
            .insert(new_sample("dev-42-0001", "dev-99"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateClientId(ref id) if id == "dev-42-0001"));

        assert_eq!(store.count().await.unwrap(), 1);
        let kept = store.get_by_client_id("dev-42-0001").await.unwrap();
        assert_eq!(kept.server_id, first.server_id);
        assert_eq!(kept.device_id, "dev-42");
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_inserts_admit_exactly_one() {
        let store = std::sync::Arc::new(MemorySampleStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.insert(new_sample("race-1", "dev-1")).await })
            })
            .collect();

        let mut ok = 0;
        let mut dup = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AppError::DuplicateClientId(_)) => dup += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(dup, 7);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_device_query_returns_only_that_device_in_order() {
        let store = MemorySampleStore::new();
        for i in 0..3 {
            store
                .insert(new_sample(&format!("dev-42-{i:04}"), "dev-42"))
                .await
                .unwrap();
            store
                .insert(new_sample(&format!("dev-7-{i:04}"), "dev-7"))
                .await
                .unwrap();
        }

        let rows: Vec<_> = store
            .samples_for_device("dev-42")
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.client_id.as_str()).collect();
        assert_eq!(ids, ["dev-42-0000", "dev-42-0001", "dev-42-0002"]);
        assert!(rows.iter().all(|r| r.device_id == "dev-42"));

        let none: Vec<_> = store
            .samples_for_device("dev-unknown")
            .try_collect()
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_device_query_is_restartable() {
        let store = MemorySampleStore::new();
        store.insert(new_sample("a", "dev-1")).await.unwrap();
        let first: Vec<_> = store.samples_for_device("dev-1").try_collect().await.unwrap();
        assert_eq!(first.len(), 1);

        store.insert(new_sample("b", "dev-1")).await.unwrap();
        let second: Vec<_> = store.samples_for_device("dev-1").try_collect().await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_failure_then_success_scenario() {
        let store = MemorySampleStore::new();
        store.insert(new_sample("dev-42-0001", "dev-42")).await.unwrap();

        let row = store
            .record_sync_attempt("dev-42-0001", &failure("timeout"))
            .await
            .unwrap();
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.last_error.as_deref(), Some("timeout"));
        assert!(!row.sync);
        assert_eq!(row.synced_at_utc, None);

        let row = store
            .record_sync_attempt("dev-42-0001", &SyncOutcome::Success)
            .await
            .unwrap();
        assert_eq!(row.attempt_count, 2);
        assert_eq!(row.last_error, None);
        assert!(row.sync);
        assert!(row.synced_at_utc.is_some());

        let stored = store.get_by_client_id("dev-42-0001").await.unwrap();
        assert_eq!(stored, row);
    }

    #[tokio::test]
    async fn test_sync_attempt_on_missing_sample_is_not_found() {
        let store = MemorySampleStore::new();
        let err = store
            .record_sync_attempt("nope", &SyncOutcome::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_conditional_attempt_rejects_stale_count() {
        let store = MemorySampleStore::new();
        store.insert(new_sample("s-1", "dev-1")).await.unwrap();
        store
            .record_sync_attempt_if("s-1", 0, &failure("timeout"))
            .await
            .unwrap();

        let err = store
            .record_sync_attempt_if("s-1", 0, &SyncOutcome::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let row = store.get_by_client_id("s-1").await.unwrap();
        assert_eq!(row.attempt_count, 1);
        assert!(!row.sync);

        let row = store
            .record_sync_attempt_if("s-1", 1, &SyncOutcome::Success)
            .await
            .unwrap();
        assert_eq!(row.attempt_count, 2);
        assert!(row.sync);
    }

    #[tokio::test]
    async fn test_mark_processed_is_independent_of_sync() {
        let store = MemorySampleStore::new();
        let row = store.insert(new_sample("s-1", "dev-1")).await.unwrap();

        let processed = store.mark_processed(row.server_id).await.unwrap();
        assert!(processed.processed);
        assert!(!processed.sync);
        assert_eq!(processed.attempt_count, 0);

        let err = store.mark_processed(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unsynced_prefers_fewest_attempts_and_respects_limit() {
        let store = MemorySampleStore::new();
        for id in ["a", "b", "c", "d"] {
            store.insert(new_sample(id, "dev-1")).await.unwrap();
        }
        store.record_sync_attempt("a", &failure("x")).await.unwrap();
        store.record_sync_attempt("b", &SyncOutcome::Success).await.unwrap();

        let pending = store.unsynced(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.client_id.as_str()).collect();
        assert_eq!(ids, ["c", "d", "a"]);

        let pending = store.unsynced(1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].client_id, "c");

        // Non-positive limits ask for nothing.
        assert!(store.unsynced(0).await.unwrap().is_empty());
        assert!(store.unsynced(-5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_recent_newest_first_with_paging() {
        let store = MemorySampleStore::new();
        for id in ["a", "b", "c"] {
            store.insert(new_sample(id, "dev-1")).await.unwrap();
        }
        let page = store.list_recent(0, 2).await.unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.client_id.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);

        let page = store.list_recent(2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].client_id, "a");
    }
}
