//! Identity providers: client id → bearer token.

use super::AccessToken;
use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// Default OAuth2 token endpoint for Google APIs.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Issues bearer tokens for the storage provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Obtain an access token on behalf of `client_id`.
    ///
    /// Failures (provider unavailable, consent refused) are
    /// [`DeliveryError::Auth`].
    async fn access_token(&self, client_id: &str) -> Result<AccessToken, DeliveryError>;
}

/// A token issued out of band, e.g. `DRIVE_ACCESS_TOKEN`.
#[derive(Debug, Clone)]
pub struct StaticToken(AccessToken);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(AccessToken::new(token))
    }
}

#[async_trait]
impl IdentityProvider for StaticToken {
    async fn access_token(&self, _client_id: &str) -> Result<AccessToken, DeliveryError> {
        if self.0.secret().is_empty() {
            return Err(DeliveryError::Auth("empty access token".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// OAuth2 refresh-token grant against a token endpoint.
pub struct RefreshTokenFlow {
    http: reqwest::Client,
    token_url: String,
    client_secret: Option<String>,
    refresh_token: String,
}

impl fmt::Debug for RefreshTokenFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenFlow")
            .field("token_url", &self.token_url)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl RefreshTokenFlow {
    pub fn new(refresh_token: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client_secret,
            refresh_token: refresh_token.into(),
        }
    }

    /// Point the flow at another token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[async_trait]
impl IdentityProvider for RefreshTokenFlow {
    async fn access_token(&self, client_id: &str) -> Result<AccessToken, DeliveryError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", self.refresh_token.as_str()),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DeliveryError::Auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Auth(format!("unreadable token response: {e}")))?;
        debug!("Access token issued (expires in {:?}s)", token.expires_in);
        Ok(AccessToken::new(token.access_token))
    }
}
