use api_client::{ChangeFeed, ChangeOp, RowStore, LIKES_TABLE, MEDIA_TABLE};
use auth::StaticIdentity;
use mocks::InMemoryBackend;
use std::sync::Arc;
use std::time::Duration;
use sync::{ChangeFeedListener, FeedConfig, MediaRepository, SyncTaskError};
use tokio::sync::mpsc;

fn config() -> FeedConfig {
    FeedConfig {
        debounce: Duration::from_millis(50),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
    }
}

fn setup() -> (Arc<InMemoryBackend>, Arc<MediaRepository>, ChangeFeedListener) {
    let backend = Arc::new(InMemoryBackend::new());
    backend.add_event("e1", "Party", "u1", None);
    backend.add_event("e2", "Other", "u9", None);
    let store: Arc<dyn RowStore> = backend.clone();
    let repo = Arc::new(MediaRepository::new(store, Arc::new(StaticIdentity(None))));
    let feed: Arc<dyn ChangeFeed> = backend.clone();
    let listener = ChangeFeedListener::with_config(feed, repo.clone(), config());
    (backend, repo, listener)
}

async fn wait_for_subscribers(backend: &InMemoryBackend, n: usize) {
    for _ in 0..100 {
        if backend.subscriber_count() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("expected {} subscribers, have {}", n, backend.subscriber_count());
}

#[tokio::test(start_paused = true)]
async fn test_notifications_are_debounced_into_one_reload() {
    let (backend, repo, listener) = setup();
    backend.add_media("e1", "u1", "a.jpg");
    let handle = listener.start("e1".into(), None);
    wait_for_subscribers(&backend, 2).await;

    backend.notify(MEDIA_TABLE, ChangeOp::Insert);
    backend.notify(LIKES_TABLE, ChangeOp::Insert);
    backend.notify(MEDIA_TABLE, ChangeOp::Update);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(backend.calls("list_media"), 1);
    assert_eq!(repo.items().len(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_foreign_event_notification_reloads_current_event() {
    let (backend, repo, listener) = setup();
    backend.add_media("e1", "u1", "mine.jpg");
    backend.add_media("e2", "u9", "theirs.jpg");
    let handle = listener.start("e1".into(), None);
    wait_for_subscribers(&backend, 2).await;

    backend.notify(MEDIA_TABLE, ChangeOp::Insert);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let items = repo.items();
    assert_eq!(items.len(), 1);
    assert!(items.iter().all(|i| i.event_id == "e1"));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_unsubscribes() {
    let (backend, _repo, listener) = setup();
    let handle = listener.start("e1".into(), None);
    wait_for_subscribers(&backend, 2).await;

    handle.shutdown().await;
    assert_eq!(backend.subscriber_count(), 0);

    backend.notify(MEDIA_TABLE, ChangeOp::Insert);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.calls("list_media"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_and_reloads_after_drop() {
    let (backend, repo, listener) = setup();
    let handle = listener.start("e1".into(), None);
    wait_for_subscribers(&backend, 2).await;

    backend.drop_connections();
    backend.add_media("e1", "u1", "while-offline.jpg");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(backend.subscriber_count(), 2);
    assert_eq!(backend.calls("list_media"), 1);
    assert_eq!(repo.items().len(), 1);
    assert!(!handle.is_finished());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reload_failure_is_forwarded() {
    let (backend, repo, listener) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = listener.start("e1".into(), Some(tx));
    wait_for_subscribers(&backend, 2).await;

    backend.fail(|f| f.list_media = true);
    backend.notify(MEDIA_TABLE, ChangeOp::Delete);

    let err = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("error forwarded")
        .expect("channel open");
    assert!(matches!(err, SyncTaskError::ReloadFailed(_)));
    assert!(repo.items().is_empty());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_writes_from_backend_trigger_reload() {
    let (backend, repo, listener) = setup();
    let handle = listener.start("e1".into(), None);
    wait_for_subscribers(&backend, 2).await;

    let row = backend
        .insert_media(&api_client::NewMediaRow::photo("e1", "u1", "https://mock.local/x.jpg"))
        .await
        .expect("insert");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(repo.item(&row.id).map(|i| i.display_name), Some("User u1".to_string()));
    handle.shutdown().await;
}
