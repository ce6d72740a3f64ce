//! IAM token manager: exchanges an IBM Cloud API key for a bearer token and
//! caches it until shortly before expiration.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use url::form_urlencoded;

use super::{AuthError, TokenProvider};

/// IBM Cloud IAM authentication endpoint.
pub const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Tokens are refreshed this long before their reported expiration.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(300);

/// Fallback lifetime when the response carries no `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now() + EXPIRY_SAFETY_MARGIN
    }
}

#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    #[serde(default)]
    expires_in: u64,
}

/// Retrieves, caches and refreshes IAM access tokens.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use watson_streaming::auth::{IamTokenManager, TokenProvider};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = IamTokenManager::new(std::env::var("WATSON_API_KEY")?)?;
///     let token = manager.token().await?;
///     println!("bearer token: {token}");
///     Ok(())
/// }
/// ```
pub struct IamTokenManager {
    api_key: String,
    iam_url: String,
    client: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl IamTokenManager {
    /// Create a manager for the default IAM endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_url(api_key, IAM_TOKEN_URL)
    }

    /// Create a manager against a non-default IAM endpoint.
    pub fn with_url(api_key: impl Into<String>, iam_url: impl Into<String>) -> Result<Self, AuthError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AuthError::MissingCredentials("IAM API key is required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::RequestFailed(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            iam_url: iam_url.into(),
            client,
            cached: RwLock::new(None),
        })
    }

    /// Create a manager from the `WATSON_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, AuthError> {
        let api_key = std::env::var("WATSON_API_KEY")
            .map_err(|_| AuthError::MissingCredentials("WATSON_API_KEY is not set".to_string()))?;
        Self::new(api_key)
    }

    async fn fetch(&self) -> Result<CachedToken, AuthError> {
        let encoded_api_key: String =
            form_urlencoded::byte_serialize(self.api_key.as_bytes()).collect();

        let response = self
            .client
            .post(&self.iam_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(format!(
                "grant_type=urn:ibm:params:oauth:grant-type:apikey&apikey={encoded_api_key}"
            ))
            .send()
            .await
            .map_err(|e| AuthError::RequestFailed(format!("failed to request IAM token: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::RequestFailed(format!(
                "IAM token request failed ({status}): {body}"
            )));
        }

        let token_response: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("failed to parse IAM token: {e}")))?;

        let lifetime = if token_response.expires_in > 0 {
            Duration::from_secs(token_response.expires_in)
        } else {
            DEFAULT_TOKEN_LIFETIME
        };

        debug!(expires_in = lifetime.as_secs(), "IAM token fetched");

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenProvider for IamTokenManager {
    async fn token(&self) -> Result<String, AuthError> {
        {
            let guard = self.cached.read().await;
            if let Some(token) = guard.as_ref()
                && !token.is_expired()
            {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch().await?;
        let access_token = fresh.access_token.clone();
        *self.cached.write().await = Some(fresh);

        Ok(access_token)
    }
}
