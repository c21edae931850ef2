//! Authorization header providers
//!
//! The fetcher asks for a header before every attempt, so providers are free
//! to rotate or refresh credentials mid-run.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Refresh this long before the advertised expiry
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("credentials rejected by auth endpoint (HTTP {status})")]
    Rejected { status: u16 },

    #[error("auth endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Yields a value for the `Authorization` header
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn auth_header(&self) -> Result<String, AuthError>;
}

/// Fixed bearer token
pub struct StaticAuthenticator {
    header: String,
}

impl StaticAuthenticator {
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self {
            header: format!("Bearer {}", token.as_ref()),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn auth_header(&self) -> Result<String, AuthError> {
        Ok(self.header.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "token")]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    header: String,
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.refresh_at.is_none_or(|at| now < at)
    }
}

/// Username/password exchange against a token endpoint, cached until
/// shortly before expiry
pub struct TokenAuthenticator {
    client: Client,
    auth_url: String,
    username: String,
    password: String,
    refresh_margin: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenAuthenticator {
    pub fn new(
        auth_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            auth_url: auth_url.into(),
            username: username.into(),
            password: password.into(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cached: Mutex::new(None),
        })
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    async fn exchange(&self) -> Result<CachedToken, AuthError> {
        debug!(auth_url = %self.auth_url, "requesting access token");

        let response = self
            .client
            .post(&self.auth_url)
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access token".to_string()));
        }

        let scheme = token.token_type.as_deref().unwrap_or("Bearer");
        let refresh_at = token.expires_in.map(|secs| {
            Instant::now() + Duration::from_secs(secs).saturating_sub(self.refresh_margin)
        });

        info!(expires_in = ?token.expires_in, "access token acquired");

        Ok(CachedToken {
            header: format!("{} {}", scheme, token.access_token),
            refresh_at,
        })
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn auth_header(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.header.clone());
        }

        let token = self.exchange().await?;
        let header = token.header.clone();
        *cached = Some(token);
        Ok(header)
    }
}
