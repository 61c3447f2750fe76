//! Resilient HTTP API client.
//!
//! [`client::ApiClient`] resolves paths against a base URL, merges
//! headers, serializes bodies, races every attempt against a timeout, and
//! wraps attempts in a circuit breaker and retry pipeline from
//! `breakwater-resilience`. Failures surface as the closed
//! [`error::ApiError`] taxonomy with locale-aware status messages.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod client;
pub mod error;
pub mod messages;
pub mod options;
pub mod transport;

pub use client::{
    ApiClient, ApiClientBuilder, RawResponse, RequestInterceptor, ResponseInterceptor,
    RetryClassifier,
};
pub use error::{ApiError, TransientRetry};
pub use messages::{ErrorMessages, DEFAULT_LOCALE};
pub use options::{
    Body, ListQuery, Page, PageInfo, Pagination, RequestOptions, ResponseValidator, SearchParams,
    Sort, SortOrder,
};
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

// Re-exported so downstream callers can configure the pipeline without a
// direct dependency on the resilience crate.
pub use breakwater_resilience as resilience;
