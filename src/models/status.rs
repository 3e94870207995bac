use serde::{Deserialize, Serialize};
use std::fmt;

/// Status shared by batches and batch rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Initial state when the row or batch is created
    Queued,
    /// Row has been claimed by a worker, or batch has rows in flight
    InProgress,
    /// Completed successfully
    Success,
    /// Completed with a processor-reported failure
    Failed,
    /// Completed with an invocation or initialization error
    Aborted,
}

impl BatchStatus {
    /// Check if this is a terminal status (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Aborted)
    }

    /// Check if this is a pending status (row still claimable or in flight)
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self::Queued
    }
}
