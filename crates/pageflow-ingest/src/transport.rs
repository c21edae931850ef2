//! Page transport
//!
//! A [`Transport`] performs exactly one HTTP exchange for a page request and
//! reports what happened. It never retries and never interprets status codes;
//! that is the fetcher's job.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::cursor::{PagePosition, PageRequest};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const USER_AGENT: &str = concat!("pageflow-ingest/", env!("CARGO_PKG_VERSION"));

/// Failures that happen before an HTTP status is available
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Raw response for one attempt
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one page request with the given `Authorization` header value
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &PageRequest,
        auth_header: &str,
    ) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport against a paginated JSON endpoint
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Query parameters for a request; an absolute `next` URL carries its own
    fn target(&self, position: &PagePosition) -> (String, Vec<(&'static str, String)>) {
        match position {
            PagePosition::Offset { offset, limit } => (
                self.base_url.clone(),
                vec![("offset", offset.to_string()), ("limit", limit.to_string())],
            ),
            PagePosition::Token { token: Some(token), .. }
                if token.starts_with("http://") || token.starts_with("https://") =>
            {
                (token.clone(), Vec::new())
            },
            PagePosition::Token { token, limit } => {
                let mut params = vec![("limit", limit.to_string())];
                if let Some(token) = token {
                    params.push(("cursor", token.clone()));
                }
                (self.base_url.clone(), params)
            },
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &PageRequest,
        auth_header: &str,
    ) -> Result<TransportResponse, TransportError> {
        let (url, params) = self.target(&request.position);
        debug!(page = request.sequence, %url, "sending page request");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .header(AUTHORIZATION, auth_header)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
