//! Integration tests for the update path: discovery, strategy fallback, and
//! what the session learns across edits.
//!
//! Each test runs against its own wiremock server playing a backend with a
//! particular set of accepted operations.

use catsync::api::{
    Capability, CapabilityRecord, Category, CategoryClient, Transport, UpdateError,
    UpdateStrategy, Verb,
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, record: CapabilityRecord) -> CategoryClient {
    let transport =
        Transport::new(&format!("{}/api", server.uri()), Duration::from_secs(5), None).unwrap();
    CategoryClient::new(transport, "Categories", 1, UpdateStrategy::resolve(&[]), record)
}

/// (method, path) of every request the server received, in order.
async fn request_log(server: &MockServer) -> Vec<(String, String)> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| (r.method.to_string(), r.url.path().to_string()))
        .collect()
}

fn entry(method: &str, path: &str) -> (String, String) {
    (method.to_string(), path.to_string())
}

/// A backend that answers reads and only accepts a full-object POST to the
/// collection as an update.
async fn get_only_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Categories/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Category::new(1, "Books", "b.png")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/Categories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Category::new(3, "New", "old.png")))
        .mount(&server)
        .await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Fallback order
// ============================================================================

#[tokio::test]
async fn test_get_only_backend_accepts_post_root_after_every_earlier_strategy() {
    let server = get_only_backend().await;
    let record = CapabilityRecord::default();
    let client = client(&server, record.clone());

    let persisted = client
        .update(&Category::new(3, "New", "old.png"))
        .await
        .unwrap();

    assert_eq!(persisted.category, Category::new(3, "New", "old.png"));
    assert_eq!(persisted.strategy, "post-root");
    assert_eq!(persisted.attempts, 8);

    assert_eq!(
        request_log(&server).await,
        vec![
            // discovery
            entry("OPTIONS", "/api/Categories/1"),
            entry("GET", "/api/Categories/1"),
            // strategies, in order
            entry("PUT", "/api/Categories/3"),
            entry("POST", "/api/Categories/3"),
            entry("PATCH", "/api/Categories/3"),
            entry("PUT", "/api/Categories/3"),
            entry("POST", "/api/Categories/Edit/3"),
            entry("GET", "/api/Categories/Update"),
            entry("GET", "/api/Categories/UpdateName"),
            entry("POST", "/api/Categories"),
        ]
    );

    // Discovery proved GET; nothing was proved unsupported by 404s.
    assert_eq!(record.get(Verb::Get), Some(Capability::Supported));
    assert_eq!(record.get(Verb::Post), Some(Capability::Supported));
    assert!(record.unsupported().is_empty());
}

#[tokio::test]
async fn test_discovery_runs_once_per_session() {
    let server = get_only_backend().await;
    let client = client(&server, CapabilityRecord::default());

    client.update(&Category::new(3, "New", "old.png")).await.unwrap();
    client.update(&Category::new(3, "New", "old.png")).await.unwrap();

    let options = request_log(&server)
        .await
        .into_iter()
        .filter(|(m, _)| m == "OPTIONS")
        .count();
    assert_eq!(options, 1);
}

// ============================================================================
// Learning across edits
// ============================================================================

#[tokio::test]
async fn test_method_not_allowed_put_is_skipped_on_later_edits() {
    let server = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/Categories/2"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let record = CapabilityRecord::default();
    let client = client(&server, record.clone());

    let first = client.update(&Category::new(2, "Toys", "")).await.unwrap();
    assert_eq!(first.strategy, "patch-json");
    assert!(record.is_known_unsupported(Verb::Put));

    server.reset().await;
    Mock::given(method("PATCH"))
        .and(path("/api/Categories/2"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let second = client.update(&Category::new(2, "Games", "")).await.unwrap();
    assert_eq!(second.strategy, "patch-json");
    assert_eq!(
        request_log(&server).await,
        vec![
            entry("POST", "/api/Categories/2"),
            entry("PATCH", "/api/Categories/2"),
        ]
    );
}

#[tokio::test]
async fn test_records_are_scoped_to_their_session() {
    let server = get_only_backend().await;
    let seeded = CapabilityRecord::seeded([(Verb::Put, Capability::Unsupported)]);
    let fresh = CapabilityRecord::default();

    let skipping = client(&server, seeded);
    let persisted = skipping
        .update(&Category::new(3, "New", "old.png"))
        .await
        .unwrap();
    assert_eq!(persisted.attempts, 6);

    let other = client(&server, fresh.clone());
    assert!(!other.record().is_known_unsupported(Verb::Put));
    assert!(fresh.entries().is_empty());
}

// ============================================================================
// Exhaustion
// ============================================================================

#[tokio::test]
async fn test_exhaustion_reports_single_failure() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(400).set_body_string("Name is required"))
        .mount(&server)
        .await;

    let client = client(&server, CapabilityRecord::default());
    let err = client
        .update(&Category::new(3, "New", ""))
        .await
        .unwrap_err();

    match &err {
        UpdateError::ExhaustedStrategies {
            attempted,
            skipped,
            last_status,
            ..
        } => {
            assert_eq!(*attempted, 8);
            assert_eq!(*skipped, 0);
            assert_eq!(*last_status, Some(400));
        }
        other => panic!("expected ExhaustedStrategies, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.starts_with("All update strategies failed"));
    assert!(message.contains("Name is required"));
}

#[tokio::test]
async fn test_unreachable_backend_exhausts_without_panicking() {
    let transport = Transport::new("http://127.0.0.1:9/api", Duration::from_secs(2), None).unwrap();
    let client = CategoryClient::new(
        transport,
        "Categories",
        1,
        UpdateStrategy::resolve(&["put-json".to_string(), "post-root".to_string()]),
        CapabilityRecord::default(),
    );

    let err = client
        .update(&Category::new(1, "Books", ""))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpdateError::ExhaustedStrategies {
            attempted: 2,
            last_status: None,
            ..
        }
    ));
}
