//! Shared type definitions for the opsflow workspace.
//!
//! This crate holds the plain data types exchanged between the remote-call
//! client and the workflow engine: tool invocations and their results, the
//! classified error descriptor every failed call carries, job status reports
//! for asynchronous tools, and the workflow template schema. Nothing in here
//! performs I/O.

pub mod job;
pub mod workflow;

pub use job::{JobPhase, JobStatusReport};
pub use workflow::{
    PollSpec, StepStatus, TemplateParameter, TemplateStep, WorkflowStatus, WorkflowStepSpec,
    WorkflowTemplate,
};

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tools exposed by the remote tool server.
///
/// The server's tool surface is fixed; the catalog validates template steps
/// against this table before anything touches the network.
pub const KNOWN_TOOLS: &[&str] = &[
    "listTables",
    "queryDatabase",
    "executeDatabase",
    "sendEmail",
    "scrapePage",
    "searchWeb",
    "crawlWebsite",
    "getCrawlStatus",
    "startThinking",
    "addThought",
    "finishThinking",
];

/// Returns true when `tool_name` is part of the remote server's tool surface.
pub fn is_known_tool(tool_name: &str) -> bool {
    KNOWN_TOOLS.contains(&tool_name)
}

/// A single named remote-tool call.
///
/// Invocations are immutable values; callers build a fresh one per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Name of the remote tool to invoke.
    pub tool_name: String,
    /// JSON-compatible parameter map passed to the tool.
    pub arguments: serde_json::Map<String, Value>,
}

impl ToolInvocation {
    /// Creates an invocation for `tool_name` with the given arguments.
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Category of a classified remote-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Credential invalid or expired; never retried beyond one refresh.
    Authentication,
    /// Local or remote deadline exceeded.
    Timeout,
    /// Server-imposed throttling, possibly with a retry-after hint.
    RateLimited,
    /// The remote tool ran and reported failure.
    ToolExecution,
    /// Transport-level failure.
    Network,
    /// Malformed invocation or unknown template/parameter; a caller bug.
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Authentication => "authentication",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ToolExecution => "tool_execution",
            Self::Network => "network",
            Self::Validation => "validation",
        };
        f.write_str(label)
    }
}

/// A classified failure attached to every non-success [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct ErrorDescriptor {
    /// Failure category used by retry policy and callers alike.
    pub category: ErrorCategory,
    /// Human-readable explanation of the failure.
    pub message: String,
    /// Server-supplied hint for when a retry may succeed.
    #[serde(default)]
    pub retry_after: Option<Duration>,
}

impl ErrorDescriptor {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Authentication, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    /// Create a rate-limited error carrying the server's retry-after hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            category: ErrorCategory::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    /// Create a tool-execution error.
    pub fn tool_execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ToolExecution, message)
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Network, message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    /// Whether the failure is eligible for the bounded retry loop.
    ///
    /// Authentication stops after the single embedded refresh attempt and
    /// validation failures are caller bugs; everything else is treated as
    /// transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Timeout
                | ErrorCategory::RateLimited
                | ErrorCategory::ToolExecution
                | ErrorCategory::Network
        )
    }
}

/// Outcome of a single tool invocation.
///
/// Exactly one of `payload` and `error` is set; use the constructors to keep
/// that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Name of the tool this result answers.
    pub tool_name: String,
    /// Decoded result payload when the call succeeded.
    pub payload: Option<Value>,
    /// Classified failure when the call did not succeed.
    pub error: Option<ErrorDescriptor>,
    /// Transport attempts consumed producing this result.
    pub attempts: u32,
}

impl ToolResult {
    /// Builds a successful result carrying the decoded payload.
    pub fn success(tool_name: impl Into<String>, payload: Value, attempts: u32) -> Self {
        Self {
            tool_name: tool_name.into(),
            payload: Some(payload),
            error: None,
            attempts,
        }
    }

    /// Builds a failed result carrying its classified error.
    pub fn failure(tool_name: impl Into<String>, error: ErrorDescriptor, attempts: u32) -> Self {
        Self {
            tool_name: tool_name.into(),
            payload: None,
            error: Some(error),
            attempts,
        }
    }

    /// Whether the invocation succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_tool_lookup() {
        assert!(is_known_tool("queryDatabase"));
        assert!(is_known_tool("getCrawlStatus"));
        assert!(!is_known_tool("dropAllTables"));
    }

    #[test]
    fn descriptor_retryability_per_category() {
        assert!(ErrorDescriptor::timeout("slow").is_retryable());
        assert!(ErrorDescriptor::rate_limited("throttled", None).is_retryable());
        assert!(ErrorDescriptor::tool_execution("boom").is_retryable());
        assert!(ErrorDescriptor::network("refused").is_retryable());
        assert!(!ErrorDescriptor::authentication("bad token").is_retryable());
        assert!(!ErrorDescriptor::validation("unknown template").is_retryable());
    }

    #[test]
    fn descriptor_display_includes_category() {
        let descriptor = ErrorDescriptor::rate_limited("slow down", Some(Duration::from_secs(3)));
        assert_eq!(descriptor.to_string(), "rate_limited: slow down");
        assert_eq!(descriptor.retry_after, Some(Duration::from_secs(3)));
    }

    #[test]
    fn result_constructors_keep_exactly_one_side() {
        let ok = ToolResult::success("queryDatabase", json!({"rows": []}), 1);
        assert!(ok.is_success());
        assert!(ok.payload.is_some());
        assert!(ok.error.is_none());

        let failed = ToolResult::failure("sendEmail", ErrorDescriptor::network("refused"), 3);
        assert!(!failed.is_success());
        assert!(failed.payload.is_none());
        assert!(failed.error.is_some());
        assert_eq!(failed.attempts, 3);
    }
}
