//! # In-Memory Store
//!
//! A self-contained [`BatchStore`] for tests and single-process embedders.
//! One mutex over both tables gives the claim the same disjointness
//! guarantee the SQL store gets from `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{BatchError, Result};
use crate::models::{Batch, BatchRow, BatchStatus};

use super::{
    merge_output_files, BatchFinalization, BatchRowCommit, BatchStore, SlowQueryCommit,
};

#[derive(Default)]
struct StoreInner {
    batches: HashMap<Uuid, Batch>,
    rows: HashMap<i64, BatchRow>,
}

/// In-memory batch store with seeding helpers
#[derive(Default)]
pub struct InMemoryBatchStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a batch record
    pub fn insert_batch(&self, batch: Batch) {
        self.lock().batches.insert(batch.id, batch);
    }

    /// Seed rows; rowids must be unique across the store
    pub fn insert_rows(&self, rows: Vec<BatchRow>) {
        let mut inner = self.lock();
        for row in rows {
            inner.rows.insert(row.rowid, row);
        }
    }

    /// Fetch a row by id, for assertions
    pub fn get_row(&self, rowid: i64) -> Option<BatchRow> {
        self.lock().rows.get(&rowid).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a terminal row commit and bump the owning batch's counter.
    /// Only rows still in a pending status are touched, which makes
    /// re-delivered commits no-ops.
    fn apply_commit(
        inner: &mut StoreInner,
        rowid: i64,
        status: BatchStatus,
        update: impl FnOnce(&mut BatchRow),
    ) -> Result<()> {
        let row = inner
            .rows
            .get_mut(&rowid)
            .ok_or_else(|| BatchError::DatabaseError(format!("No batch row {rowid}")))?;

        if !row.status.is_pending() {
            return Ok(());
        }

        row.status = status;
        update(row);
        let batch_id = row.batch;

        if status.is_terminal() {
            if let Some(batch) = inner.batches.get_mut(&batch_id) {
                match status {
                    BatchStatus::Success => batch.nsuccess += 1,
                    BatchStatus::Failed => batch.nfailed += 1,
                    BatchStatus::Aborted => batch.naborted += 1,
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn claim_queued(&self, limit: i32, worker_id: &str) -> Result<Vec<BatchRow>> {
        let mut inner = self.lock();

        let mut queued: Vec<i64> = inner
            .rows
            .values()
            .filter(|row| row.status == BatchStatus::Queued)
            .map(|row| row.rowid)
            .collect();
        queued.sort_unstable();
        queued.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(queued.len());
        for rowid in queued {
            if let Some(row) = inner.rows.get_mut(&rowid) {
                row.status = BatchStatus::InProgress;
                row.doneby = Some(worker_id.to_string());
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn commit_slow_query(&self, commit: SlowQueryCommit) -> Result<()> {
        let mut inner = self.lock();
        Self::apply_commit(&mut inner, commit.rowid, commit.status, |row| {
            row.res = Some(commit.result.clone());
            row.messages = commit.messages.clone();
            row.doneat = Some(commit.doneat);
            row.doneby = Some(commit.doneby.clone());
        })
    }

    async fn commit_batch_row(&self, commit: BatchRowCommit) -> Result<()> {
        let mut inner = self.lock();
        Self::apply_commit(&mut inner, commit.rowid, commit.status, |row| {
            row.res = Some(commit.result.clone());
            row.blobrows = commit.blobrows.clone();
            row.messages = commit.messages.clone();
            row.doneat = Some(commit.doneat);
            row.doneby = Some(commit.doneby.clone());
        })
    }

    async fn update_batch_output_files(
        &self,
        batch_id: Uuid,
        output_files: &HashMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| BatchError::DatabaseError(format!("No batch {batch_id}")))?;
        batch.outputfiles = Some(merge_output_files(batch.outputfiles.as_ref(), output_files));
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>> {
        Ok(self.lock().batches.get(&batch_id).cloned())
    }

    async fn get_pending_rows(&self, batch_id: Uuid) -> Result<Vec<BatchRow>> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|row| row.batch == batch_id && row.status.is_pending())
            .cloned()
            .collect())
    }

    async fn get_batch_rows_sorted(&self, batch_id: Uuid) -> Result<Vec<BatchRow>> {
        let mut rows: Vec<BatchRow> = self
            .lock()
            .rows
            .values()
            .filter(|row| row.batch == batch_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.line);
        Ok(rows)
    }

    async fn get_completed_batches(&self) -> Result<Vec<Uuid>> {
        let inner = self.lock();
        let mut completed = Vec::new();

        for (id, batch) in &inner.batches {
            if batch.status.is_terminal() {
                completed.push(*id);
                continue;
            }
            let rows: Vec<&BatchRow> =
                inner.rows.values().filter(|row| row.batch == *id).collect();
            // A zero-row batch never completes
            if !rows.is_empty()
                && batch.doneat.is_none()
                && rows.iter().all(|row| row.status.is_terminal())
            {
                completed.push(*id);
            }
        }
        Ok(completed)
    }

    async fn finalize_batch(&self, finalization: BatchFinalization) -> Result<()> {
        let mut inner = self.lock();
        let batch = inner
            .batches
            .get_mut(&finalization.batch_id)
            .ok_or_else(|| {
                BatchError::DatabaseError(format!("No batch {}", finalization.batch_id))
            })?;

        // doneat is immutable once set
        if batch.doneat.is_some() {
            return Ok(());
        }

        batch.status = finalization.status;
        batch.doneat = Some(finalization.doneat);
        batch.outputfiles = Some(merge_output_files(
            batch.outputfiles.as_ref(),
            &finalization.output_files,
        ));
        batch.nsuccess = finalization.nsuccess;
        batch.nfailed = finalization.nfailed;
        batch.naborted = finalization.naborted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn seeded_store() -> (InMemoryBatchStore, Uuid) {
        let store = InMemoryBatchStore::new();
        let batch_id = Uuid::new_v4();
        store.insert_batch(Batch::new(batch_id));
        store.insert_rows(vec![
            row(1, batch_id, 1),
            row(2, batch_id, 2),
            row(3, batch_id, 3),
        ]);
        (store, batch_id)
    }

    fn row(rowid: i64, batch: Uuid, line: i32) -> BatchRow {
        BatchRow {
            rowid,
            batch,
            app: "ledger".to_string(),
            op: "post".to_string(),
            line,
            context: json!({}),
            input: json!({}),
            status: BatchStatus::Queued,
            res: None,
            blobrows: None,
            messages: None,
            doneat: None,
            doneby: None,
        }
    }

    fn commit(rowid: i64, status: BatchStatus) -> BatchRowCommit {
        BatchRowCommit {
            rowid,
            status,
            result: json!({}),
            blobrows: None,
            messages: None,
            doneat: Utc::now().naive_utc(),
            doneby: "test-worker".to_string(),
        }
    }

    #[tokio::test]
    async fn test_claim_transitions_and_stamps() {
        let (store, _) = seeded_store();
        let claimed = store.claim_queued(2, "w1").await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed
            .iter()
            .all(|row| row.status == BatchStatus::InProgress));
        assert!(claimed
            .iter()
            .all(|row| row.doneby.as_deref() == Some("w1")));

        // The remaining queued set excludes claimed rows
        let rest = store.claim_queued(10, "w2").await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].rowid, 3);
    }

    #[tokio::test]
    async fn test_commit_is_idempotent_and_counts_once() {
        let (store, batch_id) = seeded_store();
        store.claim_queued(10, "w1").await.unwrap();

        store
            .commit_batch_row(commit(1, BatchStatus::Success))
            .await
            .unwrap();
        store
            .commit_batch_row(commit(1, BatchStatus::Success))
            .await
            .unwrap();

        let batch = store.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.nsuccess, 1);

        // A terminal row is never re-claimed
        assert!(store.claim_queued(10, "w2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_batches_require_all_terminal() {
        let (store, batch_id) = seeded_store();
        store.claim_queued(10, "w1").await.unwrap();
        store
            .commit_batch_row(commit(1, BatchStatus::Success))
            .await
            .unwrap();

        assert!(store.get_completed_batches().await.unwrap().is_empty());

        store
            .commit_batch_row(commit(2, BatchStatus::Failed))
            .await
            .unwrap();
        store
            .commit_batch_row(commit(3, BatchStatus::Aborted))
            .await
            .unwrap();

        assert_eq!(store.get_completed_batches().await.unwrap(), vec![batch_id]);
    }

    #[tokio::test]
    async fn test_zero_row_batch_never_completes() {
        let store = InMemoryBatchStore::new();
        store.insert_batch(Batch::new(Uuid::new_v4()));
        assert!(store.get_completed_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_is_noop_once_done() {
        let (store, batch_id) = seeded_store();
        let first_done = Utc::now().naive_utc();
        store
            .finalize_batch(BatchFinalization {
                batch_id,
                status: BatchStatus::Success,
                doneat: first_done,
                output_files: HashMap::new(),
                nsuccess: 3,
                nfailed: 0,
                naborted: 0,
            })
            .await
            .unwrap();

        store
            .finalize_batch(BatchFinalization {
                batch_id,
                status: BatchStatus::Failed,
                doneat: Utc::now().naive_utc(),
                output_files: HashMap::new(),
                nsuccess: 0,
                nfailed: 3,
                naborted: 0,
            })
            .await
            .unwrap();

        let batch = store.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.doneat, Some(first_done));
        assert_eq!(batch.status, BatchStatus::Success);
        assert_eq!(batch.nsuccess, 3);
    }

    #[tokio::test]
    async fn test_rows_sorted_by_line() {
        let store = InMemoryBatchStore::new();
        let batch_id = Uuid::new_v4();
        store.insert_batch(Batch::new(batch_id));
        store.insert_rows(vec![
            row(10, batch_id, 3),
            row(11, batch_id, 1),
            row(12, batch_id, 2),
        ]);

        let rows = store.get_batch_rows_sorted(batch_id).await.unwrap();
        let lines: Vec<i32> = rows.iter().map(|row| row.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }
}
