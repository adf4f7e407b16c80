//! Job status reports for asynchronous tools.
//!
//! Tools such as `crawlWebsite` return a job handle instead of a final
//! result; a companion status tool reports progress until the job reaches a
//! terminal phase. This module models that status payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phase reported by a job-status tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Accepted but not started.
    Queued,
    /// Running remotely.
    InProgress,
    /// Finished successfully; the report carries the result payload.
    Completed,
    /// Finished unsuccessfully; the report carries an error message.
    Failed,
}

impl JobPhase {
    /// Whether the phase ends the polling loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Decoded payload of a job-status tool response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    /// Current phase of the remote job.
    pub status: JobPhase,
    /// Completion fraction or percentage when the server reports one.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Result payload present once the job completes. The crawl status tool
    /// reports this under `results`.
    #[serde(default, alias = "results")]
    pub result: Option<Value>,
    /// Error message present when the job failed.
    #[serde(default)]
    pub error: Option<String>,
}
