//! # Batch Summarizer
//!
//! Finalizes batches whose rows have all reached a terminal status:
//! coalesces each row's blob fragments into one object per logical file and
//! writes the terminal batch record.
//!
//! ## Ordering contract
//!
//! Rows are consumed in ascending `line` order, and each fragment is written
//! verbatim followed by a single `\n`. That makes every logical file's bytes
//! stable and reproducible regardless of commit order.
//!
//! ## Idempotence
//!
//! A batch with `doneat` set is skipped before any sink is built or object
//! uploaded, so a second summarizer pass performs no writes. One batch's
//! failure is logged and does not affect the others.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::error::{BatchError, Result};
use crate::models::{Batch, BatchStatus};
use crate::objectstore::ObjectStore;
use crate::store::{BatchFinalization, BatchStore};

/// Batch-completion summarizer, invoked once per dispatch cycle
pub struct BatchSummarizer {
    store: Arc<dyn BatchStore>,
    object_store: Arc<dyn ObjectStore>,
}

impl BatchSummarizer {
    pub fn new(store: Arc<dyn BatchStore>, object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            object_store,
        }
    }

    /// Summarize every completed batch, returning how many were finalized
    /// this pass. Per-batch errors are logged and skipped.
    #[instrument(skip(self))]
    pub async fn summarize_completed(&self) -> Result<usize> {
        let candidates = self.store.get_completed_batches().await?;
        let mut finalized = 0;

        for batch_id in candidates {
            match self.summarize_batch(batch_id).await {
                Ok(true) => finalized += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(batch_id = %batch_id, error = %e, "Error summarizing batch");
                }
            }
        }

        Ok(finalized)
    }

    /// Summarize a single batch. Returns `true` when this call finalized it,
    /// `false` when there was nothing to do (already finalized, still has
    /// pending rows, or no rows at all).
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn summarize_batch(&self, batch_id: Uuid) -> Result<bool> {
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            return Err(BatchError::DatabaseError(format!("No batch {batch_id}")));
        };

        if batch.is_finalized() {
            return Ok(false);
        }

        // Re-check completion: a concurrent worker may still hold rows
        if !self.store.get_pending_rows(batch_id).await?.is_empty() {
            return Ok(false);
        }

        let rows = self.store.get_batch_rows_sorted(batch_id).await?;
        if rows.is_empty() {
            return Ok(false);
        }

        // One scratch sink per logical file, fragments appended in line order
        let mut sinks: BTreeMap<String, String> = BTreeMap::new();
        let (mut nsuccess, mut nfailed, mut naborted) = (0, 0, 0);

        for row in &rows {
            match row.status {
                BatchStatus::Success => nsuccess += 1,
                BatchStatus::Failed => nfailed += 1,
                BatchStatus::Aborted => naborted += 1,
                _ => {}
            }

            let Some(blobrows) = &row.blobrows else {
                continue;
            };
            let fragments: BTreeMap<String, String> = serde_json::from_value(blobrows.clone())
                .map_err(|e| {
                    BatchError::ValidationError(format!(
                        "Malformed blobrows on row {}: {e}",
                        row.rowid
                    ))
                })?;

            for (logical_file, fragment) in fragments {
                let sink = sinks.entry(logical_file).or_default();
                sink.push_str(&fragment);
                sink.push('\n');
            }
        }

        let mut output_files = HashMap::with_capacity(sinks.len());
        for (logical_file, content) in sinks {
            let object_id = self
                .object_store
                .put(&logical_file, content.into_bytes())
                .await?;
            debug!(batch_id = %batch_id, logical_file = %logical_file, object_id = %object_id, "Uploaded logical file");
            output_files.insert(logical_file, object_id);
        }

        let status = Batch::status_from_counters(nfailed, naborted);
        self.store
            .finalize_batch(BatchFinalization {
                batch_id,
                status,
                doneat: Utc::now().naive_utc(),
                output_files,
                nsuccess,
                nfailed,
                naborted,
            })
            .await?;

        info!(
            batch_id = %batch_id,
            status = %status,
            nsuccess = nsuccess,
            nfailed = nfailed,
            naborted = naborted,
            "Batch summarized"
        );
        Ok(true)
    }
}
