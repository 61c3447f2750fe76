//! Transport seam between the client pipeline and the HTTP stack.
//!
//! The pipeline talks to a [`Transport`] trait object, which keeps unit
//! tests free of sockets and lets callers substitute instrumented or
//! fake transports. [`ReqwestTransport`] is the production implementation.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Classified transport-level failure
///
/// The classification, not message text, determines how the pipeline maps
/// the failure into its error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport's own deadline elapsed
    #[error("transport timed out")]
    Timeout,

    /// A connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request failed after connecting
    #[error("request failed: {0}")]
    Request(String),

    /// The response body could not be read
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// A fully resolved outbound request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// A raw response as seen on the wire
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Seam for sending one HTTP request and reading the full response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a shared [`reqwest::Client`]
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder =
            self.client.request(request.method, request.url).headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify_send_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|error| TransportError::Body(error.to_string()))?
            .to_vec();

        Ok(TransportResponse { status, headers, body })
    }
}

fn classify_send_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}
