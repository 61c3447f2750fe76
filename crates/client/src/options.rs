//! Per-call request options and list query helpers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;

/// Ordered multi-value query parameters
///
/// Insertion order is preserved and names may repeat, so a multi-valued
/// parameter like `tags=[a, b]` renders as `tags=a&tags=b`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pairs: Vec<(String, String)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one name/value pair
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Append one value per element, all under the same name
    pub fn append_all<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        for value in values {
            self.pairs.push((name.to_string(), value.into()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self { pairs: iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect() }
    }
}

/// Request body payloads understood by the pipeline
#[derive(Debug, Clone)]
pub enum Body {
    /// JSON value, sent as `application/json`
    Json(Value),
    /// Form pairs, sent URL-encoded as `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// Raw bytes with an explicit content type
    Raw { content_type: String, data: Vec<u8> },
}

impl Body {
    /// Content type this body declares
    pub fn content_type(&self) -> &str {
        match self {
            Body::Json(_) => "application/json",
            Body::Form(_) => "application/x-www-form-urlencoded",
            Body::Raw { content_type, .. } => content_type,
        }
    }

    /// Serialize to wire bytes
    pub fn into_bytes(self) -> Result<Vec<u8>, ApiError> {
        match self {
            Body::Json(value) => serde_json::to_vec(&value)
                .map_err(|error| ApiError::InvalidRequest { message: error.to_string() }),
            Body::Form(pairs) => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (name, value) in &pairs {
                    serializer.append_pair(name, value);
                }
                Ok(serializer.finish().into_bytes())
            }
            Body::Raw { data, .. } => Ok(data),
        }
    }
}

/// Validator run against the parsed JSON response body
///
/// Returns the list of problems found; an empty list means the response
/// is acceptable.
pub type ResponseValidator = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// Per-call options layered over the client's defaults
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Headers merged over the client defaults; same-name wins per call
    pub headers: HeaderMap,
    /// Query parameters appended to the resolved URL
    pub search_params: SearchParams,
    /// Optional request body
    pub body: Option<Body>,
    /// Per-call timeout overriding the client default
    pub timeout: Option<Duration>,
    /// Per-call locale for status message resolution
    pub error_locale: Option<String>,
    /// Bypass the retry wrapper for this call only
    pub skip_retry: bool,
    /// Optional validation of the parsed response
    pub validate: Option<ResponseValidator>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("headers", &self.headers)
            .field("search_params", &self.search_params)
            .field("timeout", &self.timeout)
            .field("error_locale", &self.error_locale)
            .field("skip_retry", &self.skip_retry)
            .field("has_validator", &self.validate.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one header; invalid names or values are rejected
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = name
            .parse::<HeaderName>()
            .map_err(|error| ApiError::InvalidRequest { message: error.to_string() })?;
        let value = HeaderValue::from_str(value)
            .map_err(|error| ApiError::InvalidRequest { message: error.to_string() })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Append one query parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.append(name, value);
        self
    }

    /// Attach a JSON body
    pub fn json(mut self, value: Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    /// Attach a form-encoded body
    pub fn form<I, N, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        self.body =
            Some(Body::Form(pairs.into_iter().map(|(n, v)| (n.into(), v.into())).collect()));
        self
    }

    /// Override the timeout for this call
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve status messages in this locale for this call
    pub fn error_locale(mut self, locale: impl Into<String>) -> Self {
        self.error_locale = Some(locale.into());
        self
    }

    /// Bypass the retry wrapper; breaker and timeout still apply
    pub fn skip_retry(mut self) -> Self {
        self.skip_retry = true;
        self
    }

    /// Validate the parsed JSON response before decoding it
    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validator));
        self
    }
}

/// Sort direction for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Page request for list endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

/// Sort request for list endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// Structured query for list endpoints
///
/// Filters are kept sorted by name so equivalent queries always produce
/// the same query string and identity key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub pagination: Option<Pagination>,
    pub sort: Option<Sort>,
    pub filters: BTreeMap<String, String>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.pagination = Some(Pagination { page, per_page });
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(Sort { field: field.into(), order });
        self
    }

    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Render as query parameters
    pub fn into_params(self) -> SearchParams {
        let mut params = SearchParams::new();
        if let Some(Pagination { page, per_page }) = self.pagination {
            params.append("page", page.to_string());
            params.append("per_page", per_page.to_string());
        }
        if let Some(Sort { field, order }) = self.sort {
            params.append("sort_by", field);
            params.append("sort_order", order.as_str());
        }
        for (name, value) in self.filters {
            params.append(name, value);
        }
        params
    }
}

/// Pagination metadata returned by list endpoints
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageInfo {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// One page of a list endpoint's results
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}
