//! Local-directory object store: one file per object, uuid-named.

use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{BatchError, Result};

use super::ObjectStore;

/// Object store writing blobs into a local directory
pub struct LocalDirObjectStore {
    root: PathBuf,
}

impl LocalDirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path of a stored object
    pub fn object_path(&self, object_id: &str) -> PathBuf {
        self.root.join(object_id)
    }
}

#[async_trait]
impl ObjectStore for LocalDirObjectStore {
    async fn put(&self, logical_name: &str, bytes: Vec<u8>) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BatchError::ObjectStoreError(e.to_string()))?;

        // Sanitize the hint: the object id must stay a single path component
        let safe_name: String = logical_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        let object_id = format!("{}-{}", safe_name, Uuid::new_v4());

        tokio::fs::write(self.object_path(&object_id), bytes)
            .await
            .map_err(|e| BatchError::ObjectStoreError(e.to_string()))?;
        Ok(object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirObjectStore::new(dir.path());

        let object_id = store.put("out.csv", b"a,1\nb,2\n".to_vec()).await.unwrap();
        let written = tokio::fs::read(store.object_path(&object_id))
            .await
            .unwrap();
        assert_eq!(written, b"a,1\nb,2\n");
    }

    #[tokio::test]
    async fn test_hint_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirObjectStore::new(dir.path());

        let object_id = store.put("../escape/out.csv", b"x".to_vec()).await.unwrap();
        assert!(!object_id.contains('/'));
        assert!(store.object_path(&object_id).starts_with(dir.path()));
    }
}
