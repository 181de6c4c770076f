//! Wire transport used by [`ApiClient`](crate::ApiClient).

use std::time::Duration;

use apikit::Envelope;
use async_trait::async_trait;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport-level failure: the server could not be reached or did not answer
/// with an envelope.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Setup(String),

    #[error("request failed: {0}")]
    Network(String),

    #[error("response with status {status} is not an envelope: {reason}")]
    NotAnEnvelope { status: u16, reason: String },
}

/// One call ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path plus query string, relative to the transport's base URL.
    pub url: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<Envelope<Value>, TransportError>;
}

/// Source of the bearer credential attached to authenticated calls.
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed credential, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpTransportConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8087".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                tracing::error!(?e, "HttpTransport: failed to create HTTP client");
                TransportError::Setup(e.to_string())
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: OutboundRequest) -> Result<Envelope<Value>, TransportError> {
        let mut builder = self
            .client
            .request(request.method, format!("{}{}", self.base_url, request.url));
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(error = %e, "HttpTransport: request failed");
            TransportError::Network(e.to_string())
        })?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(format!("failed to read response: {e}")))?;

        serde_json::from_slice::<Envelope<Value>>(&bytes).map_err(|e| {
            tracing::warn!(status, error = %e, "HttpTransport: body is not an envelope");
            TransportError::NotAnEnvelope {
                status,
                reason: e.to_string(),
            }
        })
    }
}
