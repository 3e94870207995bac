//! # InitBlock Cache
//!
//! Cycle-local cache of per-app resource handles. The first row dispatched
//! for an app triggers the registered initializer; subsequent rows in the
//! same cycle reuse the handle. `close_all` runs at cycle end, so resources
//! are held for at most one cycle.
//!
//! The map lock is held across initializer awaits, which serializes handle
//! creation; a failed initialization is never cached.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dispatch::types::InitBlock;
use crate::error::DispatchError;
use crate::registry::ProcessorRegistry;

/// Per-cycle cache of app initialization handles
pub struct InitBlockCache {
    registry: Arc<ProcessorRegistry>,
    blocks: Mutex<HashMap<String, Arc<dyn InitBlock>>>,
}

impl InitBlockCache {
    pub fn new(registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            registry,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the app's handle, creating it through the registered
    /// initializer on first use this cycle.
    pub async fn get_or_create(&self, app: &str) -> Result<Arc<dyn InitBlock>, DispatchError> {
        let mut blocks = self.blocks.lock().await;

        if let Some(block) = blocks.get(app) {
            return Ok(Arc::clone(block));
        }

        let initializer = self.registry.lookup_initializer(app).ok_or_else(|| {
            DispatchError::NoInitializerRegistered {
                app: app.to_string(),
            }
        })?;

        let block = initializer
            .init(app)
            .await
            .map_err(|e| DispatchError::InitializerFailed {
                app: app.to_string(),
                reason: e.to_string(),
            })?;

        debug!(app = app, "Created init block");
        blocks.insert(app.to_string(), Arc::clone(&block));
        Ok(block)
    }

    /// Close every cached handle and empty the cache. Close errors are
    /// logged, not propagated; the cycle always completes its teardown.
    pub async fn close_all(&self) {
        let mut blocks = self.blocks.lock().await;
        for (app, block) in blocks.drain() {
            if let Err(e) = block.close().await {
                warn!(app = %app, error = %e, "Error closing init block");
            }
        }
    }

    /// Number of live handles, for teardown verification
    pub async fn len(&self) -> usize {
        self.blocks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::Initializer;
    use crate::error::BatchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingInitBlock {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InitBlock for CountingInitBlock {
        async fn close(&self) -> Result<(), BatchError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingInitializer {
        inits: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Initializer for CountingInitializer {
        async fn init(&self, _app: &str) -> Result<Arc<dyn InitBlock>, BatchError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingInitBlock {
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    struct FailingInitializer;

    #[async_trait]
    impl Initializer for FailingInitializer {
        async fn init(&self, _app: &str) -> Result<Arc<dyn InitBlock>, BatchError> {
            Err(BatchError::InitializationError("no credentials".to_string()))
        }
    }

    fn registry_with_counting(
        inits: &Arc<AtomicUsize>,
        closes: &Arc<AtomicUsize>,
    ) -> Arc<ProcessorRegistry> {
        let registry = Arc::new(ProcessorRegistry::new());
        registry
            .register_initializer(
                "ledger",
                Arc::new(CountingInitializer {
                    inits: Arc::clone(inits),
                    closes: Arc::clone(closes),
                }),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_handle_created_once_per_cycle() {
        let inits = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let cache = InitBlockCache::new(registry_with_counting(&inits, &closes));

        cache.get_or_create("ledger").await.unwrap();
        cache.get_or_create("ledger").await.unwrap();
        cache.get_or_create("ledger").await.unwrap();

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_all_empties_cache() {
        let inits = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let cache = InitBlockCache::new(registry_with_counting(&inits, &closes));

        cache.get_or_create("ledger").await.unwrap();
        cache.close_all().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty().await);

        // A later cycle re-creates the handle
        cache.get_or_create("ledger").await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_initializer() {
        let cache = InitBlockCache::new(Arc::new(ProcessorRegistry::new()));
        let err = cache.get_or_create("ledger").await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::NoInitializerRegistered {
                app: "ledger".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_initializer_not_cached() {
        let registry = Arc::new(ProcessorRegistry::new());
        registry
            .register_initializer("ledger", Arc::new(FailingInitializer))
            .unwrap();
        let cache = InitBlockCache::new(registry);

        let err = cache.get_or_create("ledger").await.unwrap_err();
        assert!(matches!(err, DispatchError::InitializerFailed { .. }));
        assert!(cache.is_empty().await);
    }
}
