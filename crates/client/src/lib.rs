//! Resilient client for the remote tool server.
//!
//! This crate owns everything between a [`opsflow_types::ToolInvocation`]
//! and its final [`opsflow_types::ToolResult`]: credential lifecycle,
//! transport, timeout and deadline handling, error classification, bounded
//! retry with exponential backoff, and polling for asynchronous jobs.
//! Configuration arrives through explicit constructor parameters — nothing
//! in here reads the process environment.

pub mod client;
pub mod credentials;
pub mod metrics;
pub mod poller;
pub mod retry;
pub mod transport;

pub use client::{ClientConfig, RemoteToolClient};
pub use credentials::{
    CachedTokenProvider, Credential, CredentialError, CredentialProvider, StaticTokenProvider,
    TokenSource,
};
pub use metrics::{InvocationMetrics, MetricsSnapshot};
pub use poller::JobPoller;
pub use retry::RetryConfig;
pub use transport::{HttpTransport, ToolTransport, TransportReply};
