//! # batch-core
//!
//! Persistent batch job manager: a long-running worker that claims queued
//! rows from a durable store, dispatches each to the processor registered
//! for its `(app, op)`, records per-row results, and summarizes completed
//! batches into per-logical-file objects.
//!
//! Embedding applications register initializers and processors on a
//! [`registry::ProcessorRegistry`], then hand it to a
//! [`dispatch::Dispatcher`] together with a [`store::BatchStore`] and an
//! [`objectstore::ObjectStore`] implementation and call `run()`.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod objectstore;
pub mod registry;
pub mod store;

pub use config::DispatcherConfig;
pub use error::{BatchError, DispatchError, Result};
