//! In-memory object store for tests and single-process embedders.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

use super::ObjectStore;

/// Object store keeping blobs in a process-local map
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<usize>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored blob by object id
    pub fn get(&self, object_id: &str) -> Option<Vec<u8>> {
        self.lock_objects().get(object_id).cloned()
    }

    /// Total number of successful puts, for idempotence assertions
    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, logical_name: &str, bytes: Vec<u8>) -> Result<String> {
        let object_id = format!("obj-{}-{}", logical_name, Uuid::new_v4());
        self.lock_objects().insert(object_id.clone(), bytes);
        *self.puts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        Ok(object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryObjectStore::new();
        let object_id = store.put("out.csv", b"a,1\n".to_vec()).await.unwrap();
        assert_eq!(store.get(&object_id).unwrap(), b"a,1\n");
        assert_eq!(store.put_count(), 1);
        assert!(store.get("missing").is_none());
    }
}
