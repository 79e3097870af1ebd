//! IBM Cloud IAM token exchange.
//!
//! watsonx.ai does not accept API keys directly: every request carries a
//! short-lived bearer token minted by the IAM service from the API key.
//! Tokens are cached and refreshed shortly before they expire.

use chrono::{DateTime, Utc};
use ensemble_abstraction::ModelError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Public IBM Cloud IAM endpoint.
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com";

const API_KEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Tokens are treated as expired this many seconds early.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when IAM omits both `expiration` and `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Absolute expiry as a unix timestamp.
    #[serde(default)]
    expiration: Option<i64>,
}

/// Exchanges an IBM Cloud API key for bearer tokens.
pub struct IamAuthenticator {
    api_key: String,
    iam_url: String,
    client: Client,
    timeout: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl IamAuthenticator {
    /// Creates an authenticator against the public IAM endpoint.
    #[must_use]
    pub fn new(api_key: String, client: Client) -> Self {
        Self {
            api_key,
            iam_url: DEFAULT_IAM_URL.to_string(),
            client,
            timeout: Duration::from_secs(30),
            cached: Mutex::new(None),
        }
    }

    /// Points the authenticator at a different IAM host.
    #[must_use]
    pub fn with_iam_url(mut self, iam_url: impl Into<String>) -> Self {
        self.iam_url = iam_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Same credentials against another IAM host, with an empty cache.
    #[must_use]
    pub fn relocated(&self, iam_url: impl Into<String>) -> Self {
        Self::new(self.api_key.clone(), self.client.clone()).with_iam_url(iam_url)
    }

    /// Returns the IAM base URL in use.
    pub fn iam_url(&self) -> &str {
        &self.iam_url
    }

    /// Returns a valid bearer token, requesting a new one if needed.
    ///
    /// The cache lock is held across the exchange so concurrent callers
    /// wait for a single refresh instead of each minting a token.
    pub async fn token(&self) -> Result<String, ModelError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
            debug!(expires_at = %token.expires_at, "IAM token expiring, refreshing");
        }

        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    /// Drops the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn request_token(&self) -> Result<CachedToken, ModelError> {
        let url = format!("{}/identity/token", self.iam_url);
        debug!(iam_url = %self.iam_url, "Requesting IAM token");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .form(&[("grant_type", API_KEY_GRANT_TYPE), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, iam_url = %self.iam_url, "Failed to reach IAM token service");
                ModelError::RequestError(format!("IAM token request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "IAM token service returned error status");
            return Err(match status.as_u16() {
                400 | 401 | 403 => ModelError::AuthenticationError(format!(
                    "IAM rejected the API key ({}): {}",
                    status, error_text
                )),
                _ => ModelError::RequestError(format!(
                    "IAM token service error ({}): {}",
                    status, error_text
                )),
            });
        }

        let body: IamTokenResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse IAM token response");
            ModelError::SerializationError(format!("Failed to parse IAM token response: {}", e))
        })?;

        let now = Utc::now();
        let expires_at = body
            .expiration
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| body.expires_in.map(|secs| now + chrono::Duration::seconds(secs)))
            .unwrap_or_else(|| now + chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

        debug!(expires_at = %expires_at, "IAM token acquired");
        Ok(CachedToken { access_token: body.access_token, expires_at })
    }
}

impl std::fmt::Debug for IamAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamAuthenticator")
            .field("api_key", &"<redacted>")
            .field("iam_url", &self.iam_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_response(token: &str, expires_in: i64) -> String {
        format!(r#"{{"access_token": "{}", "token_type": "Bearer", "expires_in": {}}}"#, token, expires_in)
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let auth = IamAuthenticator::new("super-secret".to_string(), Client::new());
        let rendered = format!("{:?}", auth);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains(DEFAULT_IAM_URL));
    }

    #[test]
    fn test_cached_token_freshness() {
        let now = Utc::now();
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(3600),
        };
        assert!(token.is_fresh(now));

        let expiring = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(!expiring.is_fresh(now));
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/identity/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), API_KEY_GRANT_TYPE.into()),
                mockito::Matcher::UrlEncoded("apikey".into(), "secret-key".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_response("token-1", 3600))
            .expect(1)
            .create_async()
            .await;

        let auth = IamAuthenticator::new("secret-key".to_string(), Client::new())
            .with_iam_url(server.url());

        assert_eq!(auth.token().await.unwrap(), "token-1");
        assert_eq!(auth.token().await.unwrap(), "token-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refreshed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/identity/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_response("short", 10))
            .expect(2)
            .create_async()
            .await;

        let auth = IamAuthenticator::new("key".to_string(), Client::new())
            .with_iam_url(server.url());

        auth.token().await.unwrap();
        auth.token().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_key_maps_to_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/identity/token")
            .with_status(400)
            .with_body(r#"{"errorCode": "BXNIM0415E", "errorMessage": "Provided API key could not be found."}"#)
            .create_async()
            .await;

        let auth = IamAuthenticator::new("bad".to_string(), Client::new())
            .with_iam_url(server.url());

        match auth.token().await {
            Err(ModelError::AuthenticationError(msg)) => assert!(msg.contains("could not be found")),
            other => panic!("Expected AuthenticationError, got {:?}", other),
        }
    }
}
