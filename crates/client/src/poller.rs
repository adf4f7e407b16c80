//! Polling for tools that run asynchronously on the server.
//!
//! Tools such as `crawlWebsite` answer immediately with a job handle; the
//! poller drives the companion status tool at a fixed interval until the job
//! reaches a terminal phase or the caller's deadline elapses. Every poll
//! goes through [`RemoteToolClient`]'s full retry pipeline, so a transient
//! status failure does not prematurely end the wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use opsflow_types::{ErrorDescriptor, JobPhase, JobStatusReport, ToolInvocation, ToolResult};

use crate::client::RemoteToolClient;

/// Waits for asynchronous jobs by polling a status tool.
#[derive(Clone)]
pub struct JobPoller {
    client: Arc<RemoteToolClient>,
}

impl JobPoller {
    /// Wraps the client used for status invocations.
    pub fn new(client: Arc<RemoteToolClient>) -> Self {
        Self { client }
    }

    /// Polls `status_tool` for `job_handle` until the job is terminal or
    /// `deadline` elapses.
    ///
    /// A deadline hit while the job is still running returns a timeout
    /// descriptor, but the remote job is never cancelled — the handle stays
    /// valid and the caller may resume polling later. In the returned
    /// result, `attempts` counts status polls; when a status invocation
    /// itself fails, the client's final result is passed through unchanged.
    pub async fn await_completion(
        &self,
        job_handle: &str,
        status_tool: &str,
        poll_interval: Duration,
        deadline: Duration,
    ) -> ToolResult {
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                return self.deadline_result(job_handle, status_tool, deadline, polls);
            };

            let mut arguments = Map::new();
            arguments.insert("job_id".into(), Value::String(job_handle.to_string()));
            let invocation = ToolInvocation::new(status_tool, arguments);

            let result = self.client.invoke(&invocation, remaining).await;
            polls += 1;

            if !result.is_success() {
                // The client already resolved its own retries; surface the
                // final descriptor as the poller's outcome.
                return result;
            }

            let payload = result.payload.unwrap_or(Value::Null);
            let report: JobStatusReport = match serde_json::from_value(payload.clone()) {
                Ok(report) => report,
                Err(error) => {
                    warn!(job = %job_handle, %error, "unintelligible job status payload");
                    return ToolResult::failure(
                        status_tool,
                        ErrorDescriptor::tool_execution(format!(
                            "job status payload not understood: {error}"
                        )),
                        polls,
                    );
                }
            };

            match report.status {
                JobPhase::Completed => {
                    debug!(job = %job_handle, polls, "job completed");
                    let final_payload = report.result.unwrap_or(payload);
                    return ToolResult::success(status_tool, final_payload, polls);
                }
                JobPhase::Failed => {
                    let message = report
                        .error
                        .unwrap_or_else(|| "remote job reported failure".to_string());
                    return ToolResult::failure(
                        status_tool,
                        ErrorDescriptor::tool_execution(message),
                        polls,
                    );
                }
                JobPhase::Queued | JobPhase::InProgress => {
                    debug!(
                        job = %job_handle,
                        polls,
                        progress = report.progress,
                        "job still running"
                    );
                    if started.elapsed() + poll_interval >= deadline {
                        return self.deadline_result(job_handle, status_tool, deadline, polls);
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    fn deadline_result(
        &self,
        job_handle: &str,
        status_tool: &str,
        deadline: Duration,
        polls: u32,
    ) -> ToolResult {
        warn!(job = %job_handle, ?deadline, "deadline elapsed while job was still running");
        ToolResult::failure(
            status_tool,
            ErrorDescriptor::timeout(format!(
                "job '{job_handle}' still running after {deadline:?}; the handle remains valid for later polling"
            )),
            polls,
        )
    }
}
