//! Transport seam between the client and the remote tool server.
//!
//! The [`ToolTransport`] trait carries one named tool call and reports the
//! raw classified outcome; retry policy and error descriptors live a layer
//! up in the client. [`HttpTransport`] is the production implementation,
//! speaking the server's JSON-RPC `tools/call` envelope over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use opsflow_types::ToolInvocation;

use crate::credentials::Credential;

/// Raw outcome of one transport round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportReply {
    /// The tool ran and returned a result payload.
    Success(Value),
    /// The server rejected the credential.
    Unauthorized { message: String },
    /// The server is throttling the caller.
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    /// The call reached the tool but the tool itself reported failure.
    ToolFailure { message: String },
    /// The request failed the server's validation; a caller bug.
    Invalid { message: String },
    /// A 5xx-equivalent response.
    ServerError { status: u16, message: String },
    /// The connection could not be established or broke mid-flight.
    ConnectionFailed { message: String },
    /// The per-attempt timeout elapsed locally.
    TimedOut,
}

/// Sends a single named tool invocation.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Performs one request with the borrowed credential and per-attempt
    /// timeout. Never retries.
    async fn send(
        &self,
        invocation: &ToolInvocation,
        credential: &Credential,
        timeout: Duration,
    ) -> TransportReply;
}

/// HTTP transport against a single remote endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: Url,
    http: reqwest::Client,
    next_request_id: AtomicU64,
}

impl HttpTransport {
    /// Builds a transport for the given endpoint.
    pub fn new(endpoint: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("build http client")?;
        Ok(Self {
            endpoint,
            http,
            next_request_id: AtomicU64::new(1),
        })
    }
}

/// Builds the JSON-RPC envelope for a tool call.
fn envelope(invocation: &ToolInvocation, request_id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {
            "name": invocation.tool_name,
            "arguments": invocation.arguments,
        },
        "id": request_id,
    })
}

/// Parses a `Retry-After` header carrying whole seconds.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(header::RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Extracts a human-readable message from an error response body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["error", "message", "detail"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    if body.trim().is_empty() {
        "unknown error".to_string()
    } else {
        body.trim().to_string()
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn send(
        &self,
        invocation: &ToolInvocation,
        credential: &Credential,
        timeout: Duration,
    ) -> TransportReply {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let body = envelope(invocation, request_id);
        debug!(tool = %invocation.tool_name, request_id, "sending tool call");

        let outcome = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&credential.token)
            .timeout(timeout)
            .json(&body)
            .send()
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(error) if error.is_timeout() => return TransportReply::TimedOut,
            Err(error) => {
                return TransportReply::ConnectionFailed {
                    message: error.to_string(),
                };
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = error_message(&response.text().await.unwrap_or_default());
            return TransportReply::Unauthorized { message };
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            let message = error_message(&response.text().await.unwrap_or_default());
            return TransportReply::RateLimited {
                message,
                retry_after,
            };
        }
        if status.is_server_error() {
            let message = error_message(&response.text().await.unwrap_or_default());
            return TransportReply::ServerError {
                status: status.as_u16(),
                message,
            };
        }
        if status.is_client_error() {
            let message = error_message(&response.text().await.unwrap_or_default());
            return TransportReply::Invalid { message };
        }

        let decoded: Value = match response.json().await {
            Ok(value) => value,
            Err(error) => {
                return TransportReply::ConnectionFailed {
                    message: format!("malformed response body: {error}"),
                };
            }
        };

        if let Some(error) = decoded.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("tool reported an unspecified error")
                .to_string();
            return TransportReply::ToolFailure { message };
        }

        TransportReply::Success(decoded.get("result").cloned().unwrap_or(Value::Null))
    }
}
