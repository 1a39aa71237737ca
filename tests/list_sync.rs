//! Integration tests for the mounted list view: refresh triggers, arrival
//! order, teardown, and edits relayed from the edit view.
//!
//! The backend is a wiremock server; timers run on the real clock with short
//! periods, since requests travel over real sockets.

use catsync::api::{CapabilityRecord, Category, CategoryClient, Transport, UpdateStrategy};
use catsync::sync::{
    mount, AppState, EditSession, LifecycleSignal, ListState, Notifier, PendingUpdate, ToastKind,
    UpdateRelay,
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUIET: Duration = Duration::from_secs(3600);

fn client(server: &MockServer) -> CategoryClient {
    let transport =
        Transport::new(&format!("{}/api", server.uri()), Duration::from_secs(5), None).unwrap();
    CategoryClient::new(
        transport,
        "Categories",
        1,
        UpdateStrategy::resolve(&[]),
        CapabilityRecord::default(),
    )
}

fn books() -> Vec<Category> {
    vec![
        Category::new(1, "Books", "books.png"),
        Category::new(2, "Toys", "toys.png"),
    ]
}

async fn serve_list(server: &MockServer, categories: Vec<Category>) {
    Mock::given(method("GET"))
        .and(path("/api/Categories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(categories))
        .mount(server)
        .await;
}

async fn list_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.to_string() == "GET" && r.url.path() == "/api/Categories")
        .count()
}

async fn wait_for_list_requests(server: &MockServer, n: usize) {
    for _ in 0..100 {
        if list_requests(server).await >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {} list requests", n);
}

async fn wait_for_state(state: &mut watch::Receiver<ListState>, f: impl FnMut(&ListState) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(f))
        .await
        .expect("timed out waiting for list state")
        .expect("list view closed");
}

// ============================================================================
// Triggers
// ============================================================================

#[tokio::test]
async fn test_mount_loads_list_without_notification() {
    let server = MockServer::start().await;
    serve_list(&server, books()).await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, mut toasts) = Notifier::channel(8);
    let handle = mount(client(&server), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);

    let mut state = handle.state();
    wait_for_state(&mut state, |s| s.snapshot == books()).await;
    assert!(!state.borrow().refreshing);
    assert!(toasts.try_recv().is_err());

    assert!(handle.is_active());
    handle.teardown().await.unwrap();
}

#[tokio::test]
async fn test_first_interval_tick_is_one_period_after_mount() {
    let server = MockServer::start().await;
    serve_list(&server, books()).await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, _toasts) = Notifier::channel(8);
    let handle = mount(
        client(&server),
        lifecycle.subscribe(),
        relay.subscribe(),
        notifier,
        Duration::from_millis(400),
    );

    wait_for_list_requests(&server, 1).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(list_requests(&server).await, 1);

    wait_for_list_requests(&server, 3).await;
    handle.teardown().await.unwrap();
}

#[tokio::test]
async fn test_foreground_transition_refreshes() {
    let server = MockServer::start().await;
    serve_list(&server, books()).await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, _toasts) = Notifier::channel(8);
    let handle = mount(client(&server), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);
    wait_for_list_requests(&server, 1).await;

    // Going to the background alone does not refresh.
    lifecycle.set(AppState::Background);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(list_requests(&server).await, 1);

    lifecycle.set(AppState::Active);
    wait_for_list_requests(&server, 2).await;

    lifecycle.set(AppState::Inactive);
    lifecycle.set(AppState::Active);
    wait_for_list_requests(&server, 3).await;

    handle.teardown().await.unwrap();
}

#[tokio::test]
async fn test_mount_failure_surfaces_and_manual_retry_clears_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/Categories"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve_list(&server, books()).await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, mut toasts) = Notifier::channel(8);
    let handle = mount(client(&server), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);

    let mut state = handle.state();
    wait_for_state(&mut state, |s| s.error.is_some()).await;
    let toast = toasts.recv().await.unwrap();
    assert_eq!(toast.kind, ToastKind::Error);
    assert!(toast.message.starts_with("Failed to load categories"));

    handle.refresh().await.unwrap();
    wait_for_state(&mut state, |s| s.error.is_none() && !s.refreshing).await;
    assert_eq!(state.borrow().snapshot, books());

    handle.teardown().await.unwrap();
}

// ============================================================================
// Arrival order and teardown
// ============================================================================

#[tokio::test]
async fn test_overlapping_refreshes_last_arrival_wins() {
    let server = MockServer::start().await;
    let slow = vec![Category::new(1, "Slow", "")];
    let fast = vec![Category::new(1, "Fast", "")];

    // mount
    Mock::given(method("GET"))
        .and(path("/api/Categories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(books()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // first manual refresh, answered late
    Mock::given(method("GET"))
        .and(path("/api/Categories"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(slow.clone())
                .set_delay(Duration::from_millis(600)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // second manual refresh, answered at once
    serve_list(&server, fast.clone()).await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, _toasts) = Notifier::channel(8);
    let handle = mount(client(&server), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);
    let mut state = handle.state();
    wait_for_state(&mut state, |s| s.snapshot == books()).await;

    handle.refresh().await.unwrap();
    wait_for_list_requests(&server, 2).await;
    handle.refresh().await.unwrap();

    wait_for_state(&mut state, |s| s.snapshot == fast).await;
    wait_for_state(&mut state, |s| s.snapshot == slow).await;
    assert!(!state.borrow().refreshing);

    handle.teardown().await.unwrap();
}

#[tokio::test]
async fn test_teardown_discards_in_flight_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/Categories"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(books())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, mut toasts) = Notifier::channel(8);
    let handle = mount(client(&server), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);
    let state = handle.state();

    wait_for_list_requests(&server, 1).await;
    let view = handle.teardown().await.unwrap();
    assert!(view.snapshot().is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(state.borrow().snapshot.is_empty());
    assert!(toasts.try_recv().is_err());
}

// ============================================================================
// Cross-view updates
// ============================================================================

#[tokio::test]
async fn test_relayed_rename_notifies_once() {
    let server = MockServer::start().await;
    serve_list(&server, books()).await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, mut toasts) = Notifier::channel(8);
    let handle = mount(client(&server), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);
    let mut state = handle.state();
    wait_for_state(&mut state, |s| s.snapshot == books()).await;

    let update = PendingUpdate::new(1).with_name("Ebooks");
    relay.deliver(&update);
    wait_for_state(&mut state, |s| s.snapshot[0].name == "Ebooks").await;
    assert_eq!(state.borrow().snapshot[1], Category::new(2, "Toys", "toys.png"));

    let toast = toasts.recv().await.unwrap();
    assert_eq!(toast.kind, ToastKind::Success);

    // Acknowledged, then re-delivered: absorbed.
    for _ in 0..50 {
        if relay.peek().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(relay.peek().is_empty());
    relay.deliver(&update);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(toasts.try_recv().is_err());

    handle.teardown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_params_are_cleared_without_effect() {
    let server = MockServer::start().await;
    serve_list(&server, books()).await;

    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, mut toasts) = Notifier::channel(8);
    let handle = mount(client(&server), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);
    let mut state = handle.state();
    wait_for_state(&mut state, |s| s.snapshot == books()).await;

    let mut params = PendingUpdate::new(1).with_name("Ebooks").to_params();
    params.insert("updatedCategoryId".into(), "one".into());
    relay.deliver_params(params);

    for _ in 0..50 {
        if relay.peek().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(relay.peek().is_empty());
    assert_eq!(state.borrow().snapshot, books());
    assert!(toasts.try_recv().is_err());

    handle.teardown().await.unwrap();
}

#[tokio::test]
async fn test_edit_flows_from_edit_view_into_list() {
    let server = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve_list(&server, books()).await;
    Mock::given(method("GET"))
        .and(path("/api/Categories/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(books()[0].clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/Categories"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server);
    let lifecycle = LifecycleSignal::default();
    let relay = UpdateRelay::new();
    let (notifier, mut toasts) = Notifier::channel(8);
    let handle = mount(client.clone(), lifecycle.subscribe(), relay.subscribe(), notifier, QUIET);
    let mut state = handle.state();
    wait_for_state(&mut state, |s| s.snapshot == books()).await;

    let session = EditSession::new(client, relay.clone());
    let original = session.load(1).await.unwrap();
    let outcome = session
        .submit(&original, "Ebooks", &original.image_url)
        .await
        .unwrap();
    assert_eq!(outcome.update().new_name.as_deref(), Some("Ebooks"));
    assert_eq!(outcome.update().new_image_url, None);

    wait_for_state(&mut state, |s| s.snapshot[0].name == "Ebooks").await;
    assert_eq!(state.borrow().snapshot[0].image_url, "books.png");
    assert_eq!(toasts.recv().await.unwrap().kind, ToastKind::Success);

    handle.teardown().await.unwrap();
}
