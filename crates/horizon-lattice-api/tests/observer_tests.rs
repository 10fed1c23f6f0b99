//! Tests for the unauthorized notification path.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use url::Url;

use horizon_lattice_api::{
    ApiClient, ApiError, Endpoint, MainThreadContext, RequestDescriptor, UnauthorizedObserver,
};

use common::{MockFetcher, RecordingFiles, wait_until};

#[derive(Default)]
struct SessionWatcher {
    urls: Mutex<Vec<String>>,
}

impl UnauthorizedObserver for SessionWatcher {
    fn on_unauthorized(&self, request_url: &Url, _client: &ApiClient) {
        self.urls.lock().push(request_url.to_string());
    }
}

fn client_with(fetcher: &MockFetcher) -> ApiClient {
    let scratch = std::env::temp_dir().join("horizon-lattice-api-observer-tests");
    common::client(fetcher, &RecordingFiles::new(), &scratch)
}

#[tokio::test]
async fn test_login_401_notifies_observer_once() {
    let fetcher = MockFetcher::responding(401, "{}");
    let client = client_with(&fetcher);
    let watcher = Arc::new(SessionWatcher::default());
    client.register_observer(&watcher);

    let err = client
        .execute(RequestDescriptor::<serde_json::Value>::new(Endpoint::post(
            "/login",
        )))
        .await
        .unwrap_err();

    match err {
        ApiError::FailureStatusCode { status, ref body } => {
            assert_eq!(status, 401);
            assert_eq!(body.as_ref(), b"{}");
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_unauthorized());
    assert_eq!(
        *watcher.urls.lock(),
        vec!["https://api.example.com/login".to_string()]
    );
}

#[tokio::test]
async fn test_other_statuses_do_not_notify() {
    let fetcher = MockFetcher::responding(403, "{}");
    let client = client_with(&fetcher);
    let watcher = Arc::new(SessionWatcher::default());
    client.register_observer(&watcher);

    let err = client.get::<serde_json::Value>("/admin").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(watcher.urls.lock().is_empty());
}

#[tokio::test]
async fn test_observers_are_held_weakly() {
    let fetcher = MockFetcher::responding(401, "{}");
    let client = client_with(&fetcher);

    let watcher = Arc::new(SessionWatcher::default());
    client.register_observer(&watcher);
    assert_eq!(client.observer_count(), 1);

    drop(watcher);
    assert_eq!(client.observer_count(), 0);

    let err = client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_unregister_observer() {
    let fetcher = MockFetcher::responding(401, "{}");
    let client = client_with(&fetcher);
    let watcher = Arc::new(SessionWatcher::default());
    let id = client.register_observer(&watcher);

    assert!(client.unregister_observer(id));
    assert!(!client.unregister_observer(id));

    client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert!(watcher.urls.lock().is_empty());
}

#[tokio::test]
async fn test_closure_observer_guard() {
    let fetcher = MockFetcher::responding(401, "{}");
    let client = client_with(&fetcher);
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    let guard = client.on_unauthorized(move |_, _| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    drop(guard);
    client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(client.observer_count(), 0);
}

#[tokio::test]
async fn test_observer_receives_client() {
    let fetcher = MockFetcher::responding(401, "{}");
    let client = client_with(&fetcher);
    client.add_token_signature("expired");

    let _guard = client.on_unauthorized(|_, client| client.clear_signature());

    let err = client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(client.signature().is_none());
    assert_eq!(
        fetcher.requests()[0].header("authorization"),
        Some("Bearer expired")
    );
}

#[tokio::test]
async fn test_every_observer_notified() {
    let fetcher = MockFetcher::responding(401, "{}");
    let client = client_with(&fetcher);
    let first = Arc::new(SessionWatcher::default());
    let second = Arc::new(SessionWatcher::default());
    client.register_observer(&first);
    client.register_observer(&second);

    client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert_eq!(first.urls.lock().len(), 1);
    assert_eq!(second.urls.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_main_thread_context_defers_off_thread_notifications() {
    let fetcher = MockFetcher::responding(401, "{}");
    let context = MainThreadContext::new();
    let client = ApiClient::builder("https://api.example.com")
        .fetcher(fetcher.clone())
        .notification_context(context.clone())
        .build()
        .expect("Failed to build client");

    let seen_on = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen_on.clone();
    let _guard = client.on_unauthorized(move |_, _| {
        seen_clone.lock().push(std::thread::current().id());
    });

    // The pipeline validates on a runtime worker, not on this thread.
    let err = client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(seen_on.lock().is_empty());
    assert_eq!(context.pending_count(), 1);

    assert_eq!(context.process_pending(), 1);
    assert_eq!(*seen_on.lock(), vec![std::thread::current().id()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queued_notification_does_not_keep_client_alive() {
    let fetcher = MockFetcher::responding(401, "{}");
    let context = MainThreadContext::new();
    let client = ApiClient::builder("https://api.example.com")
        .fetcher(fetcher.clone())
        .notification_context(context.clone())
        .build()
        .expect("Failed to build client");

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    let _guard = client.on_unauthorized(move |_, _| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    let err = client.get::<serde_json::Value>("/me").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(context.pending_count(), 1);

    // The client holds the only other fetcher handle.
    drop(client);
    wait_until(|| fetcher.handle_count() == 1).await;

    assert_eq!(context.process_pending(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
