//! # Processor Registry
//!
//! Process-wide mapping from `app` to initializer and from `(app, op)` to a
//! slow-query or batch processor.
//!
//! ## Architecture
//!
//! Three tables behind a single mutex: registration is a startup-time
//! operation and lookups are cheap clone-and-release reads, so one lock
//! avoids any ordering concerns between the tables. Duplicate registration
//! is a programmer error and fails loudly rather than silently overwriting.
//!
//! Once the dispatcher loop starts it freezes the registry; registration
//! attempts after that point are rejected.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batch_core::registry::ProcessorRegistry;
//! # use batch_core::dispatch::types::Initializer;
//! # fn example(init: Arc<dyn Initializer>) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ProcessorRegistry::new();
//! registry.register_initializer("ledger", init)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::dispatch::types::{BatchProcessor, Initializer, SlowQueryProcessor};
use crate::error::DispatchError;

/// Key for processor lookup in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessorKey {
    pub app: String,
    pub op: String,
}

impl ProcessorKey {
    pub fn new(app: &str, op: &str) -> Self {
        Self {
            app: app.to_string(),
            op: op.to_string(),
        }
    }
}

impl std::fmt::Display for ProcessorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.op)
    }
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub total_initializers: usize,
    pub total_slow_query_processors: usize,
    pub total_batch_processors: usize,
    pub frozen: bool,
}

#[derive(Default)]
struct RegistryInner {
    initializers: HashMap<String, Arc<dyn Initializer>>,
    slow_query_processors: HashMap<ProcessorKey, Arc<dyn SlowQueryProcessor>>,
    batch_processors: HashMap<ProcessorKey, Arc<dyn BatchProcessor>>,
    frozen: bool,
}

/// Process-wide processor registry, populated before the dispatcher starts
pub struct ProcessorRegistry {
    inner: Mutex<RegistryInner>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Register an initializer for an application.
    ///
    /// Fails with `AlreadyRegistered` if the app already has one.
    pub fn register_initializer(
        &self,
        app: &str,
        initializer: Arc<dyn Initializer>,
    ) -> Result<(), DispatchError> {
        let mut inner = self.lock();
        if inner.frozen {
            return Err(DispatchError::RegistryFrozen);
        }
        if inner.initializers.contains_key(app) {
            return Err(DispatchError::AlreadyRegistered {
                app: app.to_string(),
                op: None,
            });
        }
        inner.initializers.insert(app.to_string(), initializer);
        info!(app = app, "Registered initializer");
        Ok(())
    }

    /// Register a slow-query processor under `(app, op)`
    pub fn register_slow_query(
        &self,
        app: &str,
        op: &str,
        processor: Arc<dyn SlowQueryProcessor>,
    ) -> Result<(), DispatchError> {
        let key = ProcessorKey::new(app, op);
        let mut inner = self.lock();
        if inner.frozen {
            return Err(DispatchError::RegistryFrozen);
        }
        if inner.slow_query_processors.contains_key(&key) {
            return Err(DispatchError::AlreadyRegistered {
                app: app.to_string(),
                op: Some(op.to_string()),
            });
        }
        info!(key = %key, "Registered slow-query processor");
        inner.slow_query_processors.insert(key, processor);
        Ok(())
    }

    /// Register a batch processor under `(app, op)`
    pub fn register_batch(
        &self,
        app: &str,
        op: &str,
        processor: Arc<dyn BatchProcessor>,
    ) -> Result<(), DispatchError> {
        let key = ProcessorKey::new(app, op);
        let mut inner = self.lock();
        if inner.frozen {
            return Err(DispatchError::RegistryFrozen);
        }
        if inner.batch_processors.contains_key(&key) {
            return Err(DispatchError::AlreadyRegistered {
                app: app.to_string(),
                op: Some(op.to_string()),
            });
        }
        info!(key = %key, "Registered batch processor");
        inner.batch_processors.insert(key, processor);
        Ok(())
    }

    pub fn lookup_initializer(&self, app: &str) -> Option<Arc<dyn Initializer>> {
        self.lock().initializers.get(app).cloned()
    }

    pub fn lookup_slow_query(&self, app: &str, op: &str) -> Option<Arc<dyn SlowQueryProcessor>> {
        self.lock()
            .slow_query_processors
            .get(&ProcessorKey::new(app, op))
            .cloned()
    }

    pub fn lookup_batch(&self, app: &str, op: &str) -> Option<Arc<dyn BatchProcessor>> {
        self.lock()
            .batch_processors
            .get(&ProcessorKey::new(app, op))
            .cloned()
    }

    /// Whether `(app, op)` is present in either processor table. Used to
    /// distinguish a missing registration from a row-kind mismatch.
    pub fn has_any_processor(&self, app: &str, op: &str) -> bool {
        let key = ProcessorKey::new(app, op);
        let inner = self.lock();
        inner.slow_query_processors.contains_key(&key)
            || inner.batch_processors.contains_key(&key)
    }

    /// Reject further registration. Called by the dispatcher on start.
    pub fn freeze(&self) {
        let mut inner = self.lock();
        if !inner.frozen {
            inner.frozen = true;
            debug!("Processor registry frozen");
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.lock();
        RegistryStats {
            total_initializers: inner.initializers.len(),
            total_slow_query_processors: inner.slow_query_processors.len(),
            total_batch_processors: inner.batch_processors.len(),
            frozen: inner.frozen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        // Registration and lookup never panic while holding the lock
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::{BatchOutcome, InitBlock};
    use crate::error::BatchError;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NoopInitBlock;

    #[async_trait]
    impl InitBlock for NoopInitBlock {
        async fn close(&self) -> Result<(), BatchError> {
            Ok(())
        }
    }

    struct NoopInitializer;

    #[async_trait]
    impl Initializer for NoopInitializer {
        async fn init(&self, _app: &str) -> Result<Arc<dyn InitBlock>, BatchError> {
            Ok(Arc::new(NoopInitBlock))
        }
    }

    struct NoopBatchProcessor;

    #[async_trait]
    impl BatchProcessor for NoopBatchProcessor {
        async fn process(
            &self,
            _init_block: Arc<dyn InitBlock>,
            _context: &serde_json::Value,
            _line: i32,
            _input: &serde_json::Value,
        ) -> Result<BatchOutcome, BatchError> {
            Ok(BatchOutcome::success(serde_json::json!({})))
        }
    }

    #[test]
    fn test_duplicate_initializer_rejected() {
        let registry = ProcessorRegistry::new();
        registry
            .register_initializer("ledger", Arc::new(NoopInitializer))
            .unwrap();

        let err = registry
            .register_initializer("ledger", Arc::new(NoopInitializer))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::AlreadyRegistered {
                app: "ledger".to_string(),
                op: None
            }
        );

        // The first registration remains active
        assert!(registry.lookup_initializer("ledger").is_some());
    }

    #[test]
    fn test_duplicate_batch_processor_rejected() {
        let registry = ProcessorRegistry::new();
        registry
            .register_batch("ledger", "post", Arc::new(NoopBatchProcessor))
            .unwrap();

        let err = registry
            .register_batch("ledger", "post", Arc::new(NoopBatchProcessor))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::AlreadyRegistered {
                app: "ledger".to_string(),
                op: Some("post".to_string())
            }
        );
        assert!(registry.lookup_batch("ledger", "post").is_some());
    }

    #[test]
    fn test_same_key_allowed_across_tables() {
        // The two processor tables are keyed independently
        let registry = ProcessorRegistry::new();
        registry
            .register_batch("ledger", "post", Arc::new(NoopBatchProcessor))
            .unwrap();
        assert!(registry.lookup_slow_query("ledger", "post").is_none());
        assert!(registry.has_any_processor("ledger", "post"));
        assert!(!registry.has_any_processor("ledger", "report"));
    }

    #[test]
    fn test_frozen_registry_rejects_registration() {
        let registry = ProcessorRegistry::new();
        registry.freeze();

        let err = registry
            .register_initializer("ledger", Arc::new(NoopInitializer))
            .unwrap_err();
        assert_eq!(err, DispatchError::RegistryFrozen);
        assert!(registry.stats().frozen);
    }

    #[test]
    fn test_stats_counts() {
        let registry = ProcessorRegistry::new();
        registry
            .register_initializer("ledger", Arc::new(NoopInitializer))
            .unwrap();
        registry
            .register_batch("ledger", "post", Arc::new(NoopBatchProcessor))
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_initializers, 1);
        assert_eq!(stats.total_batch_processors, 1);
        assert_eq!(stats.total_slow_query_processors, 0);
        assert!(!stats.frozen);
    }
}
