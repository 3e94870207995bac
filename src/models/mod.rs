//! Data model for batches and batch rows.
//!
//! Payload fields (`context`, `input`, `res`, `blobrows`, `messages`,
//! `outputfiles`) are opaque JSON at this layer; schema belongs to the
//! registered processors. The summarizer parses `blobrows` as a string map,
//! nothing else is interpreted.

pub mod batch;
pub mod batch_row;
pub mod status;

pub use batch::Batch;
pub use batch_row::{messages_to_json, BatchRow, ErrorMessage};
pub use status::BatchStatus;
