//! # Object Store Layer
//!
//! Blob sink for summarized batch output. Blobs are opaque; the store hands
//! back an object id the batch's `outputfiles` map points at.

use async_trait::async_trait;

use crate::error::Result;

pub mod local;
pub mod memory;

pub use local::LocalDirObjectStore;
pub use memory::InMemoryObjectStore;

/// Content sink for per-logical-file batch artifacts
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob and return its object id. `logical_name` is a naming
    /// hint only; identity is the returned id.
    async fn put(&self, logical_name: &str, bytes: Vec<u8>) -> Result<String>;
}
