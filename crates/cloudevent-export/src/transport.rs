//! HTTP transport capability
//!
//! Delivery only needs "send a request, get a response or an error". The
//! [`Transport`] trait is that seam; [`HttpTransport`] backs it with reqwest.

use async_trait::async_trait;
use cloudevent_core::config::ExportSettings;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

pub type HttpRequest = http::Request<Vec<u8>>;
pub type HttpResponse = http::Response<Vec<u8>>;

/// Transport-level failure: no HTTP status was obtained
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport failed: {0}")]
    Other(String),
}

impl From<http::Error> for TransportError {
    fn from(e: http::Error) -> Self {
        TransportError::InvalidRequest(e.to_string())
    }
}

/// Sends one request and returns the response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a client from the export settings
    pub fn new(settings: &ExportSettings) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.as_str());

        if settings.compression {
            builder = builder.gzip(true);
        }

        let client = builder.build()?;
        Ok(Self { client })
    }

    /// Use an externally configured client (TLS, auth, pooling)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let request = reqwest::Request::try_from(request)?;
        debug!("Sending {} {}", request.method(), request.url());

        let response = self.client.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        let mut out = http::Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}
