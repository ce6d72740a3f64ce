//! Bearer-token acquisition for the streaming endpoints.
//!
//! Streams take an optional [`TokenProvider`]; when one is configured the
//! token is fetched lazily on the first read or write demand - never at
//! construction time - so a short-lived token cannot expire between
//! constructing a stream and actually using it.

mod iam;

pub use iam::{IAM_TOKEN_URL, IamTokenManager};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from token acquisition.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The token endpoint could not be reached or rejected the request.
    #[error("token request failed: {0}")]
    RequestFailed(String),

    /// The token endpoint answered with something unusable.
    #[error("token response malformed: {0}")]
    InvalidResponse(String),

    /// No credentials were supplied.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

/// Supplies a short-lived bearer token.
///
/// May be called repeatedly; implementations cache and refresh as they see
/// fit. Callers treat every returned token as short-lived.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a token suitable for an `Authorization: Bearer` header.
    async fn token(&self) -> Result<String, AuthError>;
}

/// A pre-supplied, user-managed bearer token. Assumed valid, never
/// refreshed.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wrap an externally managed access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}
