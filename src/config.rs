use crate::error::{BatchError, Result};
use std::time::Duration;

/// Configuration for the dispatcher loop.
///
/// Chunk size bounds memory and claim contention; cycle sleep bounds polling
/// load; the empty-queue backoff is randomized within its bounds so idle
/// workers do not wake in lockstep.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum rows claimed per cycle
    pub chunk_size: i32,
    /// Constant sleep between cycles
    pub cycle_sleep: Duration,
    /// Lower bound of the randomized empty-queue backoff
    pub empty_backoff_min: Duration,
    /// Upper bound of the randomized empty-queue backoff
    pub empty_backoff_max: Duration,
    /// Worker identity stamped onto claimed rows (`doneby`)
    pub worker_id: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            cycle_sleep: Duration::from_secs(10),
            empty_backoff_min: Duration::from_secs(30),
            empty_backoff_max: Duration::from_secs(60),
            worker_id: default_worker_id(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(chunk_size) = std::env::var("BATCH_CHUNK_SIZE") {
            config.chunk_size = chunk_size.parse().map_err(|e| {
                BatchError::ConfigurationError(format!("Invalid chunk_size: {e}"))
            })?;
        }

        if let Ok(cycle_sleep) = std::env::var("BATCH_CYCLE_SLEEP_SECS") {
            let secs: u64 = cycle_sleep.parse().map_err(|e| {
                BatchError::ConfigurationError(format!("Invalid cycle_sleep_secs: {e}"))
            })?;
            config.cycle_sleep = Duration::from_secs(secs);
        }

        if let Ok(worker_id) = std::env::var("BATCH_WORKER_ID") {
            config.worker_id = worker_id;
        }

        if config.chunk_size <= 0 {
            return Err(BatchError::ConfigurationError(
                "chunk_size must be positive".to_string(),
            ));
        }

        if config.empty_backoff_min > config.empty_backoff_max {
            return Err(BatchError::ConfigurationError(
                "empty_backoff_min exceeds empty_backoff_max".to_string(),
            ));
        }

        Ok(config)
    }
}

/// Hostname-qualified worker identity, uuid-suffixed so two workers on one
/// host stay distinguishable
fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{}-{}", host, &uuid::Uuid::new_v4().to_string()[..8])
}
