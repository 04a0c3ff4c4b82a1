// src/dlq.rs

//! # Dead-Letter Queue
//!
//! Terminal failures are captured with their complete original payload so an
//! operator (or an automated replayer) can re-drive them later. Two rules the
//! rest of the pipeline relies on:
//!
//! - capture stores the full serialized operation, never a projection, so a
//!   replay does not need any in-memory state that died with the process;
//! - `retry_count` is durable store state and is persisted *before* the replay
//!   handler runs, so a crash mid-replay still counts the attempt.
//!
//! Listing is keyset-paginated by `operation_id`; offset pagination over a
//! table that shrinks as entries are replayed skips rows.

use crate::errors::DlqError;
use crate::metrics::{DLQ_CAPTURES, DLQ_REPLAYS};
use crate::types::DlqEntry;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Durable storage for dead-lettered operations.
#[async_trait]
pub trait DlqStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, entry: DlqEntry) -> Result<(), DlqError>;
    async fn get(&self, operation_id: Uuid) -> Result<DlqEntry, DlqError>;
    /// Atomically bumps the retry counter and returns the new value.
    async fn increment_retry(&self, operation_id: Uuid) -> Result<u32, DlqError>;
    async fn update_error(&self, operation_id: Uuid, last_error: &str) -> Result<(), DlqError>;
    async fn delete(&self, operation_id: Uuid) -> Result<(), DlqError>;
    /// Entries with `operation_id` strictly greater than `after`, ordered by
    /// id, at most `limit` rows.
    async fn list_pending(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, DlqError>;
}

//================================================================================================//
//                                       In-Memory Store                                          //
//================================================================================================//

/// In-memory store for tests and single-process runs without Postgres.
#[derive(Debug, Default)]
pub struct InMemoryDlqStore {
    entries: RwLock<BTreeMap<Uuid, DlqEntry>>,
}

impl InMemoryDlqStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn insert(&self, entry: DlqEntry) -> Result<(), DlqError> {
        self.entries.write().await.insert(entry.operation_id, entry);
        Ok(())
    }

    async fn get(&self, operation_id: Uuid) -> Result<DlqEntry, DlqError> {
        self.entries
            .read()
            .await
            .get(&operation_id)
            .cloned()
            .ok_or(DlqError::NotFound(operation_id))
    }

    async fn increment_retry(&self, operation_id: Uuid) -> Result<u32, DlqError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&operation_id).ok_or(DlqError::NotFound(operation_id))?;
        entry.retry_count += 1;
        Ok(entry.retry_count)
    }

    async fn update_error(&self, operation_id: Uuid, last_error: &str) -> Result<(), DlqError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&operation_id).ok_or(DlqError::NotFound(operation_id))?;
        entry.last_error = last_error.to_string();
        Ok(())
    }

    async fn delete(&self, operation_id: Uuid) -> Result<(), DlqError> {
        self.entries
            .write()
            .await
            .remove(&operation_id)
            .map(|_| ())
            .ok_or(DlqError::NotFound(operation_id))
    }

    async fn list_pending(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, DlqError> {
        let entries = self.entries.read().await;
        let iter: Box<dyn Iterator<Item = &DlqEntry>> = match after {
            Some(cursor) => Box::new(
                entries
                    .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
                    .map(|(_, e)| e),
            ),
            None => Box::new(entries.values()),
        };
        Ok(iter.take(limit).cloned().collect())
    }
}

//================================================================================================//
//                                       Postgres Store                                           //
//================================================================================================//

/// Postgres-backed store used in deployment.
#[derive(Debug)]
pub struct PostgresDlqStore {
    pool: Pool,
}

impl PostgresDlqStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), DlqError> {
        let client = self.pool.get().await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS dead_letter_queue (
                    operation_id   UUID PRIMARY KEY,
                    payload        JSONB NOT NULL,
                    retry_count    INTEGER NOT NULL DEFAULT 0,
                    first_failed_at TIMESTAMPTZ NOT NULL,
                    last_error     TEXT NOT NULL
                )",
            )
            .await?;
        Ok(())
    }

    fn row_to_entry(row: &tokio_postgres::Row) -> DlqEntry {
        DlqEntry {
            operation_id: row.get("operation_id"),
            payload: row.get("payload"),
            retry_count: row.get::<_, i32>("retry_count") as u32,
            first_failed_at: row.get("first_failed_at"),
            last_error: row.get("last_error"),
        }
    }
}

#[async_trait]
impl DlqStore for PostgresDlqStore {
    async fn insert(&self, entry: DlqEntry) -> Result<(), DlqError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO dead_letter_queue
                    (operation_id, payload, retry_count, first_failed_at, last_error)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (operation_id) DO UPDATE SET last_error = EXCLUDED.last_error",
                &[
                    &entry.operation_id,
                    &entry.payload,
                    &(entry.retry_count as i32),
                    &entry.first_failed_at,
                    &entry.last_error,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, operation_id: Uuid) -> Result<DlqEntry, DlqError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT operation_id, payload, retry_count, first_failed_at, last_error
                 FROM dead_letter_queue WHERE operation_id = $1",
                &[&operation_id],
            )
            .await?
            .ok_or(DlqError::NotFound(operation_id))?;
        Ok(Self::row_to_entry(&row))
    }

    async fn increment_retry(&self, operation_id: Uuid) -> Result<u32, DlqError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "UPDATE dead_letter_queue SET retry_count = retry_count + 1
                 WHERE operation_id = $1 RETURNING retry_count",
                &[&operation_id],
            )
            .await?
            .ok_or(DlqError::NotFound(operation_id))?;
        Ok(row.get::<_, i32>(0) as u32)
    }

    async fn update_error(&self, operation_id: Uuid, last_error: &str) -> Result<(), DlqError> {
        let client = self.pool.get().await?;
        let n = client
            .execute(
                "UPDATE dead_letter_queue SET last_error = $2 WHERE operation_id = $1",
                &[&operation_id, &last_error],
            )
            .await?;
        if n == 0 {
            return Err(DlqError::NotFound(operation_id));
        }
        Ok(())
    }

    async fn delete(&self, operation_id: Uuid) -> Result<(), DlqError> {
        let client = self.pool.get().await?;
        let n = client
            .execute("DELETE FROM dead_letter_queue WHERE operation_id = $1", &[&operation_id])
            .await?;
        if n == 0 {
            return Err(DlqError::NotFound(operation_id));
        }
        Ok(())
    }

    async fn list_pending(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, DlqError> {
        let client = self.pool.get().await?;
        let limit = limit as i64;
        let rows = match after {
            Some(cursor) => {
                client
                    .query(
                        "SELECT operation_id, payload, retry_count, first_failed_at, last_error
                         FROM dead_letter_queue WHERE operation_id > $1
                         ORDER BY operation_id LIMIT $2",
                        &[&cursor, &limit],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        "SELECT operation_id, payload, retry_count, first_failed_at, last_error
                         FROM dead_letter_queue ORDER BY operation_id LIMIT $1",
                        &[&limit],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(Self::row_to_entry).collect())
    }
}

//================================================================================================//
//                                        Queue Facade                                            //
//================================================================================================//

/// Outcome of one replay attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Succeeded,
    Failed { retry_count: u32, error: String },
}

#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    store: Arc<dyn DlqStore>,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn DlqStore>) -> Self {
        Self { store }
    }

    /// Captures a terminally failed operation with its full payload.
    pub async fn capture<T: Serialize>(
        &self,
        kind: &str,
        operation_id: Uuid,
        payload: &T,
        last_error: &str,
    ) -> Result<(), DlqError> {
        let entry = DlqEntry {
            operation_id,
            payload: serde_json::to_value(payload)?,
            retry_count: 0,
            first_failed_at: Utc::now(),
            last_error: last_error.to_string(),
        };
        self.store.insert(entry).await?;
        DLQ_CAPTURES.with_label_values(&[kind]).inc();
        error!(%operation_id, kind, last_error, "Operation dead-lettered");
        Ok(())
    }

    /// Replays one entry through `handler`. The retry counter is persisted
    /// before the handler runs; a crash mid-replay still counts the attempt.
    pub async fn retry<F, Fut, E>(
        &self,
        operation_id: Uuid,
        handler: F,
    ) -> Result<ReplayOutcome, DlqError>
    where
        F: FnOnce(serde_json::Value) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let entry = self.store.get(operation_id).await?;
        let retry_count = self.store.increment_retry(operation_id).await?;

        match handler(entry.payload).await {
            Ok(()) => {
                self.store.delete(operation_id).await?;
                DLQ_REPLAYS.with_label_values(&["success"]).inc();
                info!(%operation_id, retry_count, "Dead-lettered operation replayed successfully");
                Ok(ReplayOutcome::Succeeded)
            }
            Err(e) => {
                let error = e.to_string();
                self.store.update_error(operation_id, &error).await?;
                DLQ_REPLAYS.with_label_values(&["failure"]).inc();
                warn!(%operation_id, retry_count, error, "Dead-letter replay failed");
                Ok(ReplayOutcome::Failed { retry_count, error })
            }
        }
    }

    /// Removes an entry without replaying it.
    pub async fn purge(&self, operation_id: Uuid) -> Result<(), DlqError> {
        self.store.delete(operation_id).await?;
        info!(%operation_id, "Dead-letter entry purged");
        Ok(())
    }

    pub async fn list_pending(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, DlqError> {
        self.store.list_pending(after, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> DeadLetterQueue {
        DeadLetterQueue::new(InMemoryDlqStore::new())
    }

    #[tokio::test]
    async fn capture_stores_full_payload() {
        let q = queue();
        let id = Uuid::new_v4();
        let payload = json!({"kind": "submission", "amount": "12345", "legs": [1, 2]});
        q.capture("submission", id, &payload, "timeout after 3 attempts").await.unwrap();

        let entry = q.store.get(id).await.unwrap();
        assert_eq!(entry.payload, payload);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.last_error, "timeout after 3 attempts");
    }

    #[tokio::test]
    async fn retry_count_is_persisted_before_handler_runs() {
        let q = queue();
        let id = Uuid::new_v4();
        q.capture("submission", id, &json!({"x": 1}), "boom").await.unwrap();

        // Handler observes the already-incremented durable counter.
        let store = q.store.clone();
        let out = q
            .retry(id, |_payload| {
                let store = store.clone();
                async move {
                    let durable = store.get(id).await.unwrap().retry_count;
                    assert_eq!(durable, 1);
                    Err::<(), _>("still failing")
                }
            })
            .await
            .unwrap();
        assert_eq!(out, ReplayOutcome::Failed { retry_count: 1, error: "still failing".into() });

        let entry = q.store.get(id).await.unwrap();
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.last_error, "still failing");
    }

    #[tokio::test]
    async fn successful_replay_deletes_the_entry() {
        let q = queue();
        let id = Uuid::new_v4();
        q.capture("submission", id, &json!({"x": 1}), "boom").await.unwrap();

        let out = q.retry(id, |_p| async { Ok::<(), String>(()) }).await.unwrap();
        assert_eq!(out, ReplayOutcome::Succeeded);
        assert!(matches!(q.store.get(id).await, Err(DlqError::NotFound(_))));
    }

    #[tokio::test]
    async fn retry_of_unknown_entry_fails() {
        let q = queue();
        let missing = Uuid::new_v4();
        let err = q.retry(missing, |_p| async { Ok::<(), String>(()) }).await.unwrap_err();
        assert!(matches!(err, DlqError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn listing_is_keyset_paginated() {
        let q = queue();
        let mut ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        ids.sort();
        for id in &ids {
            q.capture("submission", *id, &json!({"id": id.to_string()}), "err").await.unwrap();
        }

        let first = q.list_pending(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].operation_id, ids[0]);
        assert_eq!(first[1].operation_id, ids[1]);

        let second = q.list_pending(Some(first[1].operation_id), 2).await.unwrap();
        assert_eq!(second[0].operation_id, ids[2]);
        assert_eq!(second[1].operation_id, ids[3]);

        let rest = q.list_pending(Some(second[1].operation_id), 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].operation_id, ids[4]);
    }
}
