//! The request executor: typed HTTP calls wrapped in the resilience
//! pipeline.
//!
//! Per call the pipeline is `retry( breaker( attempt ) )`: every attempt
//! passes through the circuit breaker and races its own timeout, so one
//! logical call can contribute several breaker failure counts. `skip_retry`
//! removes only the outer retry wrapper.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use breakwater_resilience::circuit_breaker::{
    BreakerError, BreakerMetrics, CircuitBreaker, CircuitBreakerConfig,
};
use breakwater_resilience::retry::{RetryConfig, RetryExecutor, RetryPolicy};
use breakwater_resilience::{ConfigError, ConfigResult};

use crate::error::{ApiError, TransientRetry};
use crate::messages::{ErrorMessages, DEFAULT_LOCALE};
use crate::options::{ListQuery, Page, RequestOptions};
use crate::transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

/// Hook rewriting each outbound request just before it is sent
pub type RequestInterceptor = Arc<dyn Fn(TransportRequest) -> TransportRequest + Send + Sync>;

/// Hook rewriting each response before status handling
pub type ResponseInterceptor = Arc<dyn Fn(TransportResponse) -> TransportResponse + Send + Sync>;

/// Policy deciding which request errors are worth another attempt
pub type RetryClassifier = Arc<dyn RetryPolicy<ApiError> + Send + Sync>;

/// A successful response before any decoding
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Parse the body as JSON
    pub fn json(&self) -> Result<Value, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|error| ApiError::Decode { message: error.to_string() })
    }
}

/// Builder for [`ApiClient`]
pub struct ApiClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    locale: String,
    messages: ErrorMessages,
    timeout: Duration,
    retry: RetryConfig,
    retry_classifier: RetryClassifier,
    breaker: CircuitBreakerConfig,
    request_interceptor: Option<RequestInterceptor>,
    response_interceptor: Option<ResponseInterceptor>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            locale: DEFAULT_LOCALE.to_string(),
            messages: ErrorMessages::new(),
            timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
            retry_classifier: Arc::new(TransientRetry),
            breaker: CircuitBreakerConfig::default(),
            request_interceptor: None,
            response_interceptor: None,
            transport: None,
        }
    }

    /// Base URL every path is resolved against (required)
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Header sent on every request unless overridden per call
    pub fn default_header(mut self, name: &str, value: &str) -> ConfigResult<Self> {
        let name = name.parse::<reqwest::header::HeaderName>().map_err(|error| {
            ConfigError::Invalid { message: format!("invalid header name: {error}") }
        })?;
        let value = HeaderValue::from_str(value).map_err(|error| ConfigError::Invalid {
            message: format!("invalid header value: {error}"),
        })?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Default locale for status message resolution
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Status message tables layered over the built-in defaults
    pub fn messages(mut self, messages: ErrorMessages) -> Self {
        self.messages = messages;
        self
    }

    /// Default per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the default transient-error classification
    ///
    /// The default, [`TransientRetry`], retries timeouts, network errors,
    /// and 408/429/5xx statuses.
    pub fn retry_classifier<P>(mut self, policy: P) -> Self
    where
        P: RetryPolicy<ApiError> + Send + Sync + 'static,
    {
        self.retry_classifier = Arc::new(policy);
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn request_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(TransportRequest) -> TransportRequest + Send + Sync + 'static,
    {
        self.request_interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn response_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(TransportResponse) -> TransportResponse + Send + Sync + 'static,
    {
        self.response_interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Replace the production transport (used heavily in tests)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> ConfigResult<ApiClient> {
        let base_url = self.base_url.ok_or_else(|| ConfigError::Invalid {
            message: "base_url is required".to_string(),
        })?;
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "timeout must be greater than zero".to_string(),
            });
        }
        self.retry.validate()?;
        let breaker = CircuitBreaker::new(self.breaker)?;

        Ok(ApiClient {
            base_url,
            default_headers: self.default_headers,
            locale: self.locale,
            messages: self.messages,
            timeout: self.timeout,
            retry: self.retry,
            retry_classifier: self.retry_classifier,
            breaker,
            request_interceptor: self.request_interceptor,
            response_interceptor: self.response_interceptor,
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestTransport::default())),
        })
    }
}

/// Resilient HTTP API client
///
/// Clones share the circuit breaker and transport, so cloning is the
/// intended way to hand the client to multiple tasks.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    default_headers: HeaderMap,
    locale: String,
    messages: ErrorMessages,
    timeout: Duration,
    retry: RetryConfig,
    retry_classifier: RetryClassifier,
    breaker: CircuitBreaker,
    request_interceptor: Option<RequestInterceptor>,
    response_interceptor: Option<ResponseInterceptor>,
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// Metrics of the client's circuit breaker
    pub fn breaker_metrics(&self) -> BreakerMetrics {
        self.breaker.metrics()
    }

    /// Reset the client's circuit breaker to closed
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    /// Execute a request and return the raw successful response
    ///
    /// Non-success statuses become [`ApiError::Status`] with a message
    /// resolved in the call's locale; they participate in retry
    /// classification like any other error.
    #[instrument(skip(self, options), fields(method = %method, path))]
    pub async fn request_raw(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<RawResponse, ApiError> {
        let url = self.resolve_url(path, &options)?;
        let headers = self.merge_headers(&options);
        let (content_type, body) = match options.body {
            Some(body) => (Some(body.content_type().to_string()), Some(body.into_bytes()?)),
            None => (None, None),
        };
        let timeout = options.timeout.unwrap_or(self.timeout);
        let locale = options.error_locale.as_deref().unwrap_or(&self.locale);

        let run = || async {
            self.breaker
                .execute(|| {
                    self.attempt(
                        method.clone(),
                        url.clone(),
                        headers.clone(),
                        content_type.as_deref(),
                        body.clone(),
                        timeout,
                        locale,
                    )
                })
                .await
                .map_err(|error| match error {
                    BreakerError::Open { retry_after } => ApiError::CircuitOpen { retry_after },
                    BreakerError::Inner(inner) => inner,
                })
        };

        if options.skip_retry {
            run().await
        } else {
            RetryExecutor::new(self.retry.clone(), Arc::clone(&self.retry_classifier))
                .execute(run)
                .await
        }
    }

    /// Execute a request and decode the JSON response into `T`
    ///
    /// When the options carry a validator it runs against the parsed JSON
    /// first; validation problems surface as [`ApiError::Validation`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut options: RequestOptions,
    ) -> Result<T, ApiError> {
        let validator = options.validate.take();
        let raw = self.request_raw(method, path, options).await?;
        let value = raw.json()?;

        if let Some(validator) = validator {
            let errors = validator(&value);
            if !errors.is_empty() {
                debug!(count = errors.len(), "response failed validation");
                return Err(ApiError::Validation { errors });
            }
        }

        serde_json::from_value(value)
            .map_err(|error| ApiError::Decode { message: error.to_string() })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, options).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, options).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, options).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::PATCH, path, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, options).await
    }

    /// Fetch one page of a list endpoint
    pub async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: ListQuery,
    ) -> Result<Page<T>, ApiError> {
        let mut options = RequestOptions::new();
        options.search_params = query.into_params();
        self.request(Method::GET, path, options).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        content_type: Option<&str>,
        body: Option<Vec<u8>>,
        timeout: Duration,
        locale: &str,
    ) -> Result<RawResponse, ApiError> {
        if let Some(content_type) = content_type {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::from_str(content_type).map_err(|error| {
                    ApiError::InvalidRequest { message: error.to_string() }
                })?;
                headers.insert(CONTENT_TYPE, value);
            }
        }

        let mut request = TransportRequest { method, url, headers, body };
        if let Some(interceptor) = &self.request_interceptor {
            request = interceptor(request);
        }

        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| ApiError::Timeout { timeout })?
            .map_err(|error| map_transport_error(error, timeout))?;
        let response = match &self.response_interceptor {
            Some(interceptor) => interceptor(response),
            None => response,
        };

        let status = response.status.as_u16();
        if !response.status.is_success() {
            let message = self.messages.resolve(status, locale);
            let body = String::from_utf8_lossy(&response.body).into_owned();
            debug!(status, "request answered with error status");
            return Err(ApiError::Status { status, message, body });
        }

        Ok(RawResponse { status, headers: response.headers, body: response.body })
    }

    fn resolve_url(&self, path: &str, options: &RequestOptions) -> Result<Url, ApiError> {
        let mut url = self.base_url.join(path).map_err(|error| ApiError::InvalidRequest {
            message: format!("cannot resolve `{path}` against base URL: {error}"),
        })?;

        if !options.search_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in options.search_params.iter() {
                pairs.append_pair(name, value);
            }
        }

        Ok(url)
    }

    fn merge_headers(&self, options: &RequestOptions) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

fn map_transport_error(error: TransportError, timeout: Duration) -> ApiError {
    match error {
        TransportError::Timeout => ApiError::Timeout { timeout },
        other => ApiError::Network { message: other.to_string() },
    }
}
