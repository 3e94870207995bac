//! # Dispatcher Loop
//!
//! The core control loop of the worker. One iteration ("cycle") claims a
//! bounded block of queued rows, routes each to its registered processor,
//! commits the results, summarizes completed batches, and tears down the
//! cycle's init blocks.
//!
//! ## Architecture
//!
//! Cross-worker coordination happens entirely through the store's atomic
//! claim: rows move from `queued` to `in_progress` in one observable step,
//! stamped with this worker's identity, so concurrent workers partition the
//! queued set disjointly. Within a cycle rows are dispatched sequentially in
//! store-returned order.
//!
//! ## Error Handling
//!
//! The loop never exits on a processing error. An initializer or invocation
//! error aborts the affected row; a missing registration fails it; a commit
//! error leaves it in progress for the store's recovery policy. Claim errors
//! back off and retry next cycle. Only [`Dispatcher::stop`] ends the loop,
//! and sleeps are interruptible so shutdown takes effect between cycles.

use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DispatcherConfig;
use crate::error::{BatchError, DispatchError, Result};
use crate::models::{messages_to_json, BatchRow, BatchStatus, ErrorMessage};
use crate::objectstore::ObjectStore;
use crate::registry::ProcessorRegistry;
use crate::store::{BatchRowCommit, BatchStore, SlowQueryCommit};

use super::init_cache::InitBlockCache;
use super::summarizer::BatchSummarizer;
use super::types::{BatchOutcome, CycleOutcome, SlowQueryOutcome};

/// Result of invoking a row's processor
enum RowExecution {
    Slow(SlowQueryOutcome),
    Batch(BatchOutcome),
}

/// The claim/dispatch/commit/summarize worker loop
pub struct Dispatcher {
    store: Arc<dyn BatchStore>,
    registry: Arc<ProcessorRegistry>,
    summarizer: BatchSummarizer,
    config: DispatcherConfig,
    running: AtomicBool,
    shutdown: Notify,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn BatchStore>,
        object_store: Arc<dyn ObjectStore>,
        registry: Arc<ProcessorRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        let summarizer = BatchSummarizer::new(Arc::clone(&store), object_store);
        Self {
            store,
            registry,
            summarizer,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Run the dispatcher loop until [`stop`](Self::stop) is called.
    ///
    /// Freezes the registry: registration is a startup-time operation and is
    /// rejected once the loop is live.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(BatchError::ValidationError(
                "Dispatcher is already running".to_string(),
            ));
        }

        self.registry.freeze();
        let stats = self.registry.stats();
        info!(
            chunk_size = self.config.chunk_size,
            initializers = stats.total_initializers,
            slow_query_processors = stats.total_slow_query_processors,
            batch_processors = stats.total_batch_processors,
            "Dispatcher started"
        );

        while self.should_continue() {
            match self.run_cycle().await {
                Ok(outcome) if outcome.claimed == 0 => {
                    let backoff = self.empty_backoff();
                    debug!(backoff_secs = backoff.as_secs(), "No queued rows, backing off");
                    self.interruptible_sleep(backoff).await;
                }
                Ok(outcome) => {
                    info!(
                        claimed = outcome.claimed,
                        committed = outcome.committed,
                        commit_failures = outcome.commit_failures,
                        summarized = outcome.summarized,
                        "Dispatch cycle complete"
                    );
                    self.interruptible_sleep(self.config.cycle_sleep).await;
                }
                Err(e) => {
                    error!(error = %e, "Error claiming queued rows");
                    self.interruptible_sleep(self.empty_backoff()).await;
                }
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Request a graceful stop. The loop exits after the in-flight cycle;
    /// per-row cancellation is not supported.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    pub fn should_continue(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a single dispatch cycle (for tests or controlled execution).
    ///
    /// An empty claim skips dispatch and summarization entirely; the caller
    /// applies the randomized empty-queue backoff.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let rows = self
            .store
            .claim_queued(self.config.chunk_size, &self.config.worker_id)
            .await?;

        let mut outcome = CycleOutcome {
            claimed: rows.len(),
            ..CycleOutcome::default()
        };
        if rows.is_empty() {
            return Ok(outcome);
        }

        let cache = InitBlockCache::new(Arc::clone(&self.registry));

        for row in &rows {
            if self.dispatch_row(&cache, row).await {
                outcome.committed += 1;
            } else {
                outcome.commit_failures += 1;
            }
        }

        match self.summarizer.summarize_completed().await {
            Ok(summarized) => outcome.summarized = summarized,
            Err(e) => error!(error = %e, "Error summarizing completed batches"),
        }

        cache.close_all().await;
        Ok(outcome)
    }

    /// Dispatch one claimed row and commit its result. Returns whether the
    /// terminal result reached the store; on a commit error the row stays
    /// `in_progress`.
    async fn dispatch_row(&self, cache: &InitBlockCache, row: &BatchRow) -> bool {
        let committed = match self.execute_row(cache, row).await {
            Ok(RowExecution::Slow(outcome)) => self.commit_slow_outcome(row, outcome).await,
            Ok(RowExecution::Batch(outcome)) => self.commit_batch_outcome(row, outcome).await,
            Err(fault) => {
                warn!(
                    rowid = row.rowid,
                    app = %row.app,
                    op = %row.op,
                    error = %fault,
                    "Row dispatch fault"
                );
                self.commit_fault(row, fault).await
            }
        };

        match committed {
            Ok(()) => true,
            Err(e) => {
                error!(
                    rowid = row.rowid,
                    error = %e,
                    "Error committing row result; row remains in progress"
                );
                false
            }
        }
    }

    /// Resolve the row's init block and processor, then invoke it
    async fn execute_row(
        &self,
        cache: &InitBlockCache,
        row: &BatchRow,
    ) -> std::result::Result<RowExecution, DispatchError> {
        let init_block = cache.get_or_create(&row.app).await?;

        if row.is_slow_query() {
            let Some(processor) = self.registry.lookup_slow_query(&row.app, &row.op) else {
                return Err(self.missing_processor_fault(row));
            };
            let outcome = processor
                .process(init_block, &row.context, &row.input)
                .await
                .map_err(|e| DispatchError::ProcessorFailed {
                    app: row.app.clone(),
                    op: row.op.clone(),
                    reason: e.to_string(),
                })?;
            Self::require_terminal(row, outcome.status)?;
            Ok(RowExecution::Slow(outcome))
        } else {
            let Some(processor) = self.registry.lookup_batch(&row.app, &row.op) else {
                return Err(self.missing_processor_fault(row));
            };
            let outcome = processor
                .process(init_block, &row.context, row.line, &row.input)
                .await
                .map_err(|e| DispatchError::ProcessorFailed {
                    app: row.app.clone(),
                    op: row.op.clone(),
                    reason: e.to_string(),
                })?;
            Self::require_terminal(row, outcome.status)?;
            Ok(RowExecution::Batch(outcome))
        }
    }

    /// Distinguish an unregistered `(app, op)` from a processor of the wrong
    /// flavor: the former is a configuration failure, the latter a row-kind
    /// mismatch.
    fn missing_processor_fault(&self, row: &BatchRow) -> DispatchError {
        if self.registry.has_any_processor(&row.app, &row.op) {
            DispatchError::ProcessorKindMismatch {
                app: row.app.clone(),
                op: row.op.clone(),
                line: row.line,
            }
        } else {
            DispatchError::NoProcessorRegistered {
                app: row.app.clone(),
                op: row.op.clone(),
            }
        }
    }

    fn require_terminal(
        row: &BatchRow,
        status: BatchStatus,
    ) -> std::result::Result<(), DispatchError> {
        if status.is_terminal() {
            Ok(())
        } else {
            Err(DispatchError::ProcessorFailed {
                app: row.app.clone(),
                op: row.op.clone(),
                reason: format!("processor reported non-terminal status {status}"),
            })
        }
    }

    async fn commit_slow_outcome(&self, row: &BatchRow, outcome: SlowQueryOutcome) -> Result<()> {
        self.store
            .commit_slow_query(SlowQueryCommit {
                rowid: row.rowid,
                status: outcome.status,
                result: outcome.result,
                messages: messages_to_json(&outcome.messages),
                doneat: Utc::now().naive_utc(),
                doneby: self.config.worker_id.clone(),
            })
            .await?;

        // Slow-query output files go straight onto the owning batch
        if !outcome.output_files.is_empty() {
            self.store
                .update_batch_output_files(row.batch, &outcome.output_files)
                .await?;
        }
        Ok(())
    }

    async fn commit_batch_outcome(&self, row: &BatchRow, outcome: BatchOutcome) -> Result<()> {
        let blobrows = if outcome.blobrows.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&outcome.blobrows)?)
        };

        self.store
            .commit_batch_row(BatchRowCommit {
                rowid: row.rowid,
                status: outcome.status,
                result: outcome.result,
                blobrows,
                messages: messages_to_json(&outcome.messages),
                doneat: Utc::now().naive_utc(),
                doneby: self.config.worker_id.clone(),
            })
            .await
    }

    /// Commit a dispatch fault as the row's terminal result. A missing
    /// registration fails the row; everything else aborts it.
    async fn commit_fault(&self, row: &BatchRow, fault: DispatchError) -> Result<()> {
        let (status, code) = match &fault {
            DispatchError::NoProcessorRegistered { .. } => (BatchStatus::Failed, "no_processor"),
            DispatchError::ProcessorKindMismatch { .. } => {
                (BatchStatus::Aborted, "processor_mismatch")
            }
            DispatchError::NoInitializerRegistered { .. }
            | DispatchError::InitializerFailed { .. } => (BatchStatus::Aborted, "initializer"),
            _ => (BatchStatus::Aborted, "processor"),
        };
        let messages = messages_to_json(&[ErrorMessage::new(code, fault.to_string())]);
        let doneat = Utc::now().naive_utc();

        if row.is_slow_query() {
            self.store
                .commit_slow_query(SlowQueryCommit {
                    rowid: row.rowid,
                    status,
                    result: serde_json::Value::Null,
                    messages,
                    doneat,
                    doneby: self.config.worker_id.clone(),
                })
                .await
        } else {
            self.store
                .commit_batch_row(BatchRowCommit {
                    rowid: row.rowid,
                    status,
                    result: serde_json::Value::Null,
                    blobrows: None,
                    messages,
                    doneat,
                    doneby: self.config.worker_id.clone(),
                })
                .await
        }
    }

    /// Randomized backoff within the configured empty-queue bounds
    fn empty_backoff(&self) -> Duration {
        Self::empty_backoff_in(&self.config)
    }

    fn empty_backoff_in(config: &DispatcherConfig) -> Duration {
        let min = config.empty_backoff_min.as_millis() as u64;
        let max = config.empty_backoff_max.as_millis() as u64;
        if min >= max {
            return config.empty_backoff_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Sleep that wakes early on shutdown
    async fn interruptible_sleep(&self, duration: Duration) {
        if !self.should_continue() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.notified() => {}
        }
    }
}
