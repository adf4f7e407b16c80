//! The resilient remote tool client.
//!
//! [`RemoteToolClient::invoke`] drives one named tool call to a final
//! [`ToolResult`]: it borrows a credential, sends the request with the
//! remaining time budget, classifies the outcome, and resolves retryable
//! categories internally with bounded exponential backoff. Only a final
//! descriptor — retries exhausted or a non-retryable category — is surfaced
//! to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Map;
use tracing::{debug, warn};

use opsflow_types::{ErrorDescriptor, ToolInvocation, ToolResult};

use crate::credentials::CredentialProvider;
use crate::metrics::{InvocationMetrics, MetricsSnapshot};
use crate::retry::RetryConfig;
use crate::transport::{ToolTransport, TransportReply};

/// Client-level configuration, supplied by the caller's settings layer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on a single transport attempt.
    pub call_timeout: Duration,
    /// Retry budget and backoff schedule shared by all retryable categories.
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Issues named remote-tool invocations with retry, backoff, and error
/// classification.
///
/// The client is safe for concurrent use: the transport and credential
/// provider are shared behind `Arc`, and the metrics block is lock-free.
pub struct RemoteToolClient {
    transport: Arc<dyn ToolTransport>,
    credentials: Arc<dyn CredentialProvider>,
    config: ClientConfig,
    metrics: InvocationMetrics,
}

impl RemoteToolClient {
    /// Wires the client to its collaborators.
    pub fn new(
        transport: Arc<dyn ToolTransport>,
        credentials: Arc<dyn CredentialProvider>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            config,
            metrics: InvocationMetrics::default(),
        }
    }

    /// Invokes a tool, resolving retries internally, within `deadline`.
    ///
    /// The deadline is authoritative: once it elapses — or the next backoff
    /// sleep would overrun it — the client stops immediately and returns a
    /// timeout descriptor regardless of remaining attempt budget.
    pub async fn invoke(&self, invocation: &ToolInvocation, deadline: Duration) -> ToolResult {
        let started = Instant::now();
        self.metrics.record_invocation();

        let mut credential = match self.credentials.credential().await {
            Ok(credential) => credential,
            Err(error) => {
                self.metrics.record_failure();
                return ToolResult::failure(
                    &invocation.tool_name,
                    ErrorDescriptor::authentication(error.to_string()),
                    0,
                );
            }
        };

        let mut attempts: u32 = 0;
        let mut refreshed = false;

        loop {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                self.metrics.record_failure();
                return ToolResult::failure(
                    &invocation.tool_name,
                    ErrorDescriptor::timeout(format!(
                        "deadline of {deadline:?} elapsed before the call could complete"
                    )),
                    attempts,
                );
            };
            let per_attempt = remaining.min(self.config.call_timeout);

            let reply = self
                .transport
                .send(invocation, &credential, per_attempt)
                .await;
            attempts += 1;

            let descriptor = match reply {
                TransportReply::Success(payload) => {
                    self.metrics.record_success();
                    debug!(tool = %invocation.tool_name, attempts, "tool call succeeded");
                    return ToolResult::success(&invocation.tool_name, payload, attempts);
                }
                TransportReply::Unauthorized { message } => {
                    if !refreshed {
                        refreshed = true;
                        match self.credentials.refresh(&credential).await {
                            Ok(fresh) => {
                                debug!(tool = %invocation.tool_name, "credential refreshed after unauthorized response");
                                credential = fresh;
                                continue;
                            }
                            Err(error) => {
                                self.metrics.record_failure();
                                return ToolResult::failure(
                                    &invocation.tool_name,
                                    ErrorDescriptor::authentication(error.to_string()),
                                    attempts,
                                );
                            }
                        }
                    }
                    self.metrics.record_failure();
                    return ToolResult::failure(
                        &invocation.tool_name,
                        ErrorDescriptor::authentication(message),
                        attempts,
                    );
                }
                TransportReply::Invalid { message } => {
                    self.metrics.record_failure();
                    return ToolResult::failure(
                        &invocation.tool_name,
                        ErrorDescriptor::validation(message),
                        attempts,
                    );
                }
                TransportReply::RateLimited {
                    message,
                    retry_after,
                } => {
                    self.metrics.record_rate_limit();
                    ErrorDescriptor::rate_limited(message, retry_after)
                }
                TransportReply::ToolFailure { message } => ErrorDescriptor::tool_execution(message),
                TransportReply::ServerError { status, message } => {
                    ErrorDescriptor::network(format!("server error {status}: {message}"))
                }
                TransportReply::ConnectionFailed { message } => ErrorDescriptor::network(message),
                TransportReply::TimedOut => ErrorDescriptor::timeout(format!(
                    "request exceeded the attempt timeout of {per_attempt:?}"
                )),
            };

            if attempts >= self.config.retry.max_attempts {
                warn!(
                    tool = %invocation.tool_name,
                    attempts,
                    error = %descriptor,
                    "retry budget exhausted"
                );
                self.metrics.record_failure();
                return ToolResult::failure(&invocation.tool_name, descriptor, attempts);
            }

            // The server's retry-after hint takes precedence over the
            // computed backoff delay.
            let delay = descriptor
                .retry_after
                .unwrap_or_else(|| self.config.retry.delay_for_attempt(attempts - 1));
            if started.elapsed() + delay >= deadline {
                self.metrics.record_failure();
                return ToolResult::failure(
                    &invocation.tool_name,
                    ErrorDescriptor::timeout(format!(
                        "deadline of {deadline:?} would elapse during retry backoff"
                    )),
                    attempts,
                );
            }

            debug!(
                tool = %invocation.tool_name,
                attempt = attempts,
                ?delay,
                error = %descriptor,
                "retrying after classified failure"
            );
            self.metrics.record_retry();
            tokio::time::sleep(delay).await;
        }
    }

    /// Invokes the server's health tool.
    pub async fn health_check(&self, deadline: Duration) -> ToolResult {
        let invocation = ToolInvocation::new("health", Map::new());
        self.invoke(&invocation, deadline).await
    }

    /// Returns a point-in-time copy of the invocation counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
