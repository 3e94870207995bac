//! # Dispatch Types
//!
//! Core traits and data structures shared across the dispatch components:
//! per-app initialization handles, the two processor flavors, and their
//! outcome structures.
//!
//! A processor's `Err` return is an *invocation error* and aborts the row;
//! a processor-reported `Failed` status is a *row failure*. The two are kept
//! distinct all the way into the batch counters.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BatchError;
use crate::models::{BatchStatus, ErrorMessage};

/// Per-app resource handle (DB clients, external credentials) consumed by
/// processors. Constructed lazily per cycle, released at cycle end.
#[async_trait]
pub trait InitBlock: std::fmt::Debug + Send + Sync {
    /// Release the handle's resources. Called exactly once, at cycle end.
    async fn close(&self) -> Result<(), BatchError>;
}

/// Factory producing an app's [`InitBlock`]
#[async_trait]
pub trait Initializer: Send + Sync {
    async fn init(&self, app: &str) -> Result<Arc<dyn InitBlock>, BatchError>;
}

/// Processor for whole-query rows (`line == 0`).
///
/// Returns output files already pushed to the object store, keyed by logical
/// file name; the dispatcher merges them onto the owning batch.
#[async_trait]
pub trait SlowQueryProcessor: Send + Sync {
    async fn process(
        &self,
        init_block: Arc<dyn InitBlock>,
        context: &serde_json::Value,
        input: &serde_json::Value,
    ) -> Result<SlowQueryOutcome, BatchError>;
}

/// Processor for per-line rows (`line > 0`).
///
/// Returns blob fragments keyed by logical file name; the summarizer
/// coalesces them across the batch in ascending line order.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(
        &self,
        init_block: Arc<dyn InitBlock>,
        context: &serde_json::Value,
        line: i32,
        input: &serde_json::Value,
    ) -> Result<BatchOutcome, BatchError>;
}

/// Result of a slow-query processor invocation
#[derive(Debug, Clone)]
pub struct SlowQueryOutcome {
    pub status: BatchStatus,
    pub result: serde_json::Value,
    pub messages: Vec<ErrorMessage>,
    /// Logical file name -> object-store id, written onto the batch
    pub output_files: HashMap<String, String>,
}

impl SlowQueryOutcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            status: BatchStatus::Success,
            result,
            messages: Vec::new(),
            output_files: HashMap::new(),
        }
    }
}

/// Result of a batch processor invocation
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub result: serde_json::Value,
    pub messages: Vec<ErrorMessage>,
    /// Logical file name -> fragment this row contributes
    pub blobrows: HashMap<String, String>,
}

impl BatchOutcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            status: BatchStatus::Success,
            result,
            messages: Vec::new(),
            blobrows: HashMap::new(),
        }
    }
}

/// Per-cycle dispatch accounting, for logging and tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    /// Rows claimed this cycle
    pub claimed: usize,
    /// Rows whose terminal result reached the store
    pub committed: usize,
    /// Rows left in progress because the result commit failed
    pub commit_failures: usize,
    /// Batches finalized by the summarizer this cycle
    pub summarized: usize,
}
