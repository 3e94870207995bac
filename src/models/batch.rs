//! # Batch Model
//!
//! A batch is the logical unit of summarization: a set of rows sharing an
//! owning UUID, finalized together once every row has reached a terminal
//! status.
//!
//! ## Database Schema
//!
//! Maps to the `batches` table:
//! - `id`: Owning UUID (primary key)
//! - `status`: Aggregate status, `queued` until summarized
//! - `nsuccess` / `nfailed` / `naborted`: Per-status row counters
//! - `outputfiles`: JSONB map of logical file name to object-store id
//! - `doneat`: Summarization timestamp; NULL until the batch is finalized,
//!   immutable afterwards

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::BatchStatus;

/// A batch record with aggregate counters and summarization output.
///
/// `doneat` doubles as the summarization guard: a batch with `doneat` set has
/// been finalized and is never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub status: BatchStatus,
    pub nsuccess: i32,
    pub nfailed: i32,
    pub naborted: i32,
    pub outputfiles: Option<serde_json::Value>,
    pub reqat: NaiveDateTime,
    pub doneat: Option<NaiveDateTime>,
}

impl Batch {
    /// Create a new queued batch with zeroed counters
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            status: BatchStatus::Queued,
            nsuccess: 0,
            nfailed: 0,
            naborted: 0,
            outputfiles: None,
            reqat: chrono::Utc::now().naive_utc(),
            doneat: None,
        }
    }

    /// Whether the batch has already been summarized
    pub fn is_finalized(&self) -> bool {
        self.doneat.is_some()
    }

    /// Terminal status implied by the counters: `failed` dominates `aborted`,
    /// which dominates `success`
    pub fn status_from_counters(nfailed: i32, naborted: i32) -> BatchStatus {
        if nfailed > 0 {
            BatchStatus::Failed
        } else if naborted > 0 {
            BatchStatus::Aborted
        } else {
            BatchStatus::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_batch_is_queued() {
        let batch = Batch::new(Uuid::new_v4());
        assert_eq!(batch.status, BatchStatus::Queued);
        assert_eq!(batch.nsuccess, 0);
        assert!(!batch.is_finalized());
    }

    #[test]
    fn test_status_from_counters_failed_dominates() {
        assert_eq!(Batch::status_from_counters(0, 0), BatchStatus::Success);
        assert_eq!(Batch::status_from_counters(1, 0), BatchStatus::Failed);
        assert_eq!(Batch::status_from_counters(0, 1), BatchStatus::Aborted);
        assert_eq!(Batch::status_from_counters(1, 1), BatchStatus::Failed);
    }
}
