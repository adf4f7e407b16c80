//! Bearer credential lifecycle for outbound tool calls.
//!
//! A [`CredentialProvider`] owns the cached credential; the client only
//! borrows it for the duration of a single invocation. Refresh is a single
//! logical operation with no retry logic of its own — retrying is the
//! client's responsibility.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// An opaque bearer token plus an optional expiry timestamp.
///
/// A missing expiry means "assume non-expiring until the server says
/// otherwise".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token placed in the request's authorization header.
    pub token: String,
    /// Instant after which the token is no longer valid.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Builds a non-expiring credential.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Builds a credential that expires at `expires_at`.
    pub fn expiring(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Whether the credential's expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Errors raised by credential acquisition and refresh.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no valid credential available: {0}")]
    Missing(String),

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

impl CredentialError {
    /// Create a missing-credential error.
    pub fn missing(reason: impl Into<String>) -> Self {
        Self::Missing(reason.into())
    }

    /// Create a refresh-failure error.
    pub fn refresh_failed(reason: impl Into<String>) -> Self {
        Self::RefreshFailed(reason.into())
    }
}

/// Supplies and refreshes the bearer credential used for outbound calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a valid, non-expired credential.
    async fn credential(&self) -> Result<Credential, CredentialError>;

    /// Forces re-acquisition after the server rejected `rejected`.
    ///
    /// Implementations may return a cached credential newer than `rejected`
    /// instead of contacting their upstream again; in-flight calls holding a
    /// previously issued credential are unaffected.
    async fn refresh(&self, rejected: &Credential) -> Result<Credential, CredentialError>;
}

/// Provider backed by a fixed token.
///
/// Refresh always fails, so an unauthorized response surfaces as an
/// authentication error on the first retry.
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    /// Wraps a fixed bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        if self.credential.is_expired() {
            return Err(CredentialError::missing("static token has expired"));
        }
        Ok(self.credential.clone())
    }

    async fn refresh(&self, _rejected: &Credential) -> Result<Credential, CredentialError> {
        Err(CredentialError::refresh_failed(
            "static token cannot be refreshed",
        ))
    }
}

/// Issues fresh credentials on demand, e.g. from an OAuth token endpoint.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtains a brand-new credential.
    async fn issue(&self) -> Result<Credential, CredentialError>;
}

/// Caches the last issued credential and serializes refreshes.
///
/// The cache lock is held across the upstream call, so only one refresh is
/// ever in flight; concurrent callers wait on the same refresh. A refresh
/// whose `rejected` token no longer matches the cache returns the cached
/// credential — another caller already replaced it.
pub struct CachedTokenProvider<S> {
    source: S,
    cached: Mutex<Option<Credential>>,
}

impl<S: TokenSource> CachedTokenProvider<S> {
    /// Wraps `source` with an empty cache.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<S: TokenSource> CredentialProvider for CachedTokenProvider<S> {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref()
            && !credential.is_expired()
        {
            return Ok(credential.clone());
        }
        let fresh = self.source.issue().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    async fn refresh(&self, rejected: &Credential) -> Result<Credential, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref()
            && credential.token != rejected.token
            && !credential.is_expired()
        {
            debug!("refresh already performed by a concurrent caller");
            return Ok(credential.clone());
        }
        let fresh = self.source.issue().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}
