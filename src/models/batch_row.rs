//! # BatchRow Model
//!
//! The claimable, dispatchable unit of work. Each row belongs to exactly one
//! batch and carries its own opaque input and output payloads.
//!
//! ## Overview
//!
//! `line` is the ordering key within a batch and also encodes the row kind:
//! `line == 0` marks a slow-query row (whole-query processing, output files
//! written directly onto the batch), `line > 0` marks a batch row (per-line
//! processing, blob fragments coalesced by the summarizer in ascending line
//! order).
//!
//! ## Database Schema
//!
//! Maps to the `batchrows` table:
//! - `rowid`: Primary key (BIGINT)
//! - `batch`: Owning batch UUID
//! - `app` / `op`: Processor routing tags
//! - `context` / `input` / `res`: Opaque JSONB payloads (schema is the
//!   processor's concern)
//! - `blobrows`: JSONB map of logical file name to fragment text; the only
//!   payload the core parses
//! - `messages`: JSONB array of structured diagnostics
//! - `doneat` / `doneby`: Completion timestamp and worker identity

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::BatchStatus;

/// One claimable work item belonging to a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    pub rowid: i64,
    pub batch: Uuid,
    pub app: String,
    pub op: String,
    pub line: i32,
    pub context: serde_json::Value,
    pub input: serde_json::Value,
    pub status: BatchStatus,
    pub res: Option<serde_json::Value>,
    pub blobrows: Option<serde_json::Value>,
    pub messages: Option<serde_json::Value>,
    pub doneat: Option<NaiveDateTime>,
    pub doneby: Option<String>,
}

impl BatchRow {
    /// Whether this is a slow-query row (`line == 0`)
    pub fn is_slow_query(&self) -> bool {
        self.line == 0
    }
}

/// Structured diagnostic recorded against a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorMessage {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
        }
    }
}

/// Serialize a message list for row storage; empty lists are stored as NULL
pub fn messages_to_json(messages: &[ErrorMessage]) -> Option<serde_json::Value> {
    if messages.is_empty() {
        None
    } else {
        serde_json::to_value(messages).ok()
    }
}
