//! # Store Layer
//!
//! The dispatcher's and summarizer's sole dependency on persistence, as an
//! abstract command interface. The claim is the one cross-worker
//! coordination point: the store must transition rows from `queued` to
//! `in_progress` in a single observable step so concurrent workers partition
//! the queued set disjointly.
//!
//! Both commit shapes are idempotent on `rowid`: they only apply while the
//! row is still non-terminal, and adjust the owning batch's counters exactly
//! once, guarded by that same transition.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Batch, BatchRow, BatchStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryBatchStore;
pub use postgres::PgBatchStore;

/// Result commit for a slow-query row (`line == 0`)
#[derive(Debug, Clone)]
pub struct SlowQueryCommit {
    pub rowid: i64,
    pub status: BatchStatus,
    pub result: serde_json::Value,
    pub messages: Option<serde_json::Value>,
    pub doneat: NaiveDateTime,
    pub doneby: String,
}

/// Result commit for a batch row (`line > 0`)
#[derive(Debug, Clone)]
pub struct BatchRowCommit {
    pub rowid: i64,
    pub status: BatchStatus,
    pub result: serde_json::Value,
    pub blobrows: Option<serde_json::Value>,
    pub messages: Option<serde_json::Value>,
    pub doneat: NaiveDateTime,
    pub doneby: String,
}

/// Terminal batch update produced by the summarizer
#[derive(Debug, Clone)]
pub struct BatchFinalization {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub doneat: NaiveDateTime,
    /// Logical file name -> object-store id, merged into the batch's
    /// existing `outputfiles` without clobbering slow-query entries
    pub output_files: HashMap<String, String>,
    pub nsuccess: i32,
    pub nfailed: i32,
    pub naborted: i32,
}

/// Persistent store commands required by the dispatcher and summarizer
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Atomically select up to `limit` queued rows, transition them to
    /// `in_progress`, and stamp them with the worker identity. Concurrent
    /// claims must never return the same row twice.
    async fn claim_queued(&self, limit: i32, worker_id: &str) -> Result<Vec<BatchRow>>;

    /// Idempotent slow-query row update
    async fn commit_slow_query(&self, commit: SlowQueryCommit) -> Result<()>;

    /// Idempotent batch row update
    async fn commit_batch_row(&self, commit: BatchRowCommit) -> Result<()>;

    /// Merge slow-query output files onto the owning batch
    async fn update_batch_output_files(
        &self,
        batch_id: Uuid,
        output_files: &HashMap<String, String>,
    ) -> Result<()>;

    /// Fetch a batch record
    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>>;

    /// Rows of the batch still in `queued` or `in_progress`; empty means the
    /// batch is complete
    async fn get_pending_rows(&self, batch_id: Uuid) -> Result<Vec<BatchRow>>;

    /// All rows of the batch, ascending by `line`
    async fn get_batch_rows_sorted(&self, batch_id: Uuid) -> Result<Vec<BatchRow>>;

    /// Batches whose status is terminal, or whose rows are all terminal
    /// while `doneat` is still unset
    async fn get_completed_batches(&self) -> Result<Vec<Uuid>>;

    /// Terminal atomic batch update. A no-op once `doneat` is set.
    async fn finalize_batch(&self, finalization: BatchFinalization) -> Result<()>;
}

/// Merge `incoming` into an optional JSON object of output files, preserving
/// existing entries on key collision
pub(crate) fn merge_output_files(
    existing: Option<&serde_json::Value>,
    incoming: &HashMap<String, String>,
) -> serde_json::Value {
    let mut merged = match existing {
        Some(serde_json::Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    for (file, object_id) in incoming {
        merged
            .entry(file.clone())
            .or_insert_with(|| serde_json::Value::String(object_id.clone()));
    }
    serde_json::Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_into_empty() {
        let mut incoming = HashMap::new();
        incoming.insert("out.csv".to_string(), "obj-1".to_string());
        let merged = merge_output_files(None, &incoming);
        assert_eq!(merged, json!({"out.csv": "obj-1"}));
    }

    #[test]
    fn test_merge_preserves_existing_entries() {
        let existing = json!({"report.pdf": "obj-xyz"});
        let mut incoming = HashMap::new();
        incoming.insert("report.pdf".to_string(), "obj-other".to_string());
        incoming.insert("out.csv".to_string(), "obj-1".to_string());

        let merged = merge_output_files(Some(&existing), &incoming);
        assert_eq!(
            merged,
            json!({"report.pdf": "obj-xyz", "out.csv": "obj-1"})
        );
    }
}
