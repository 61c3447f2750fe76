//! End-to-end tests against a live mock HTTP server.
//!
//! These exercise the full pipeline, production transport included:
//! URL assembly, body serialization, status mapping, retry behavior,
//! timeouts, and composition with the deduplication and caching policies.

use std::sync::Once;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use breakwater_client::resilience::dedupe::Deduplicator;
use breakwater_client::resilience::key::request_key;
use breakwater_client::resilience::retry::RetryConfig;
use breakwater_client::{ApiClient, ApiError, ListQuery, Page, RequestOptions};

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
}

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(5))
        .max_delay(Duration::from_millis(10))
        .jitter_factor(0.0)
        .build()
        .unwrap()
}

async fn client_for(server: &MockServer, max_attempts: u32) -> ApiClient {
    init_tracing();
    ApiClient::builder()
        .base_url(Url::parse(&server.uri()).unwrap())
        .retry(fast_retry(max_attempts))
        .build()
        .unwrap()
}

/// Validates `ApiClient::get` behavior for the happy path scenario.
///
/// Assertions:
/// - Confirms query parameters, including repeated names, reach the
///   server.
/// - Confirms the JSON response decodes into the caller's type.
#[tokio::test]
async fn test_get_with_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .and(query_param("expand", "profile"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "Alice"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 1).await;
    let options = RequestOptions::new().with_param("expand", "profile");
    let user: User = client.get("/users/1", options).await.unwrap();

    assert_eq!(user, User { id: 1, name: "Alice".to_string() });
}

/// Validates `ApiClient::post` behavior for the JSON body scenario.
///
/// Assertions:
/// - Confirms the body arrives as the serialized JSON value.
/// - Confirms the content type header is set automatically.
#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"name": "Bob"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2, "name": "Bob"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 1).await;
    let options = RequestOptions::new().json(json!({"name": "Bob"}));
    let user: User = client.post("/users", options).await.unwrap();

    assert_eq!(user.id, 2);
}

/// Validates `ApiClient::get` behavior for the error status scenario.
///
/// Assertions:
/// - Confirms a 404 surfaces with the default message and the server's
///   raw body.
#[tokio::test]
async fn test_not_found_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/99"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"error":"gone"}"#))
        .mount(&server)
        .await;

    let client = client_for(&server, 1).await;
    let error = client.get::<User>("/users/99", RequestOptions::new()).await.unwrap_err();

    assert_eq!(
        error,
        ApiError::Status {
            status: 404,
            message: "Resource not found.".to_string(),
            body: r#"{"error":"gone"}"#.to_string(),
        }
    );
}

/// Validates `ApiClient` retry behavior for the flaky downstream
/// scenario.
///
/// Assertions:
/// - Confirms 503 responses are retried and the request eventually
///   succeeds within the attempt budget.
#[tokio::test]
async fn test_retries_until_recovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 3).await;
    let value: Value = client.get("/flaky", RequestOptions::new()).await.unwrap();
    assert_eq!(value, json!({"ok": true}));
}

/// Validates `ApiClient` timeout behavior for the slow server scenario.
///
/// Assertions:
/// - Confirms a response slower than the per-call budget fails with the
///   timeout kind in roughly that budget.
#[tokio::test]
async fn test_per_call_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = client_for(&server, 1).await;
    let options = RequestOptions::new().timeout(Duration::from_millis(50));

    let started = Instant::now();
    let error = client.get::<Value>("/slow", options).await.unwrap_err();

    assert_eq!(error, ApiError::Timeout { timeout: Duration::from_millis(50) });
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// Validates `ApiClient::get_list` behavior for the paginated listing
/// scenario.
///
/// Assertions:
/// - Confirms pagination and filter parameters reach the server.
/// - Confirms the page envelope decodes with its metadata.
#[tokio::test]
async fn test_list_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("page", "2"))
        .and(query_param("per_page", "1"))
        .and(query_param("status", "active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": 3, "name": "Cara"}],
            "pagination": {"page": 2, "per_page": 1, "total": 3, "total_pages": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 1).await;
    let query = ListQuery::new().page(2, 1).filter("status", "active");
    let page: Page<User> = client.get_list("/users", query).await.unwrap();

    assert_eq!(page.data, vec![User { id: 3, name: "Cara".to_string() }]);
    assert_eq!(page.pagination.total_pages, 3);
}

/// Validates pipeline composition for the single-flight scenario.
///
/// Assertions:
/// - Confirms two concurrent identical calls hit the server once and
///   both observe the same payload.
#[tokio::test]
async fn test_deduplicated_concurrent_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"count": 7}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 1).await;
    let dedupe: Deduplicator<Value, ApiError> = Deduplicator::new();
    let key = request_key("/users", [("page", "1")]);

    let worker = |client: ApiClient| {
        move || async move {
            client.get::<Value>("/users", RequestOptions::new().with_param("page", "1")).await
        }
    };

    let first = dedupe.execute(&key, worker(client.clone()));
    let second = dedupe.execute(&key, worker(client.clone()));
    let (a, b) = tokio::join!(first, second);

    assert_eq!(a.unwrap(), json!({"count": 7}));
    assert_eq!(b.unwrap(), json!({"count": 7}));
    assert_eq!(dedupe.stats().deduplicated, 1);
}
