use api_client::ChangeOp;
use async_trait::async_trait;
use auth::{Principal, StaticIdentity};
use cache::{CacheLookup, CachedImage, ImageCacheError, ImageFetcher};
use gallery::{GalleryBackend, GallerySession, Projection, SessionOptions, SortBy, ViewState};
use image::{DynamicImage, ImageFormat, RgbImage};
use mocks::InMemoryBackend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync::FeedConfig;
use tempfile::TempDir;

#[derive(Default)]
struct CountingFetcher {
    fetches: AtomicUsize,
}

#[async_trait]
impl ImageFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str) -> Result<CachedImage, ImageCacheError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(CachedImage {
            bytes: vec![1, 2, 3],
            content_type: "image/jpeg".into(),
        })
    }

    async fn probe(&self, _url: &str) -> bool {
        true
    }
}

fn options(live: bool) -> SessionOptions {
    SessionOptions {
        feed: FeedConfig {
            debounce: Duration::from_millis(20),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        },
        live,
        ..Default::default()
    }
}

async fn open(
    backend: &Arc<InMemoryBackend>,
    live: bool,
) -> (GallerySession, Arc<CountingFetcher>) {
    let fetcher = Arc::new(CountingFetcher::default());
    let principal = Principal::new("u1", Some("eve@example.com"));
    let identity = Arc::new(StaticIdentity::signed_in(principal));
    let session = GallerySession::open(
        GalleryBackend::from_shared(backend.clone()),
        identity,
        fetcher.clone(),
        "e1",
        options(live),
    )
    .await
    .expect("open session");
    (session, fetcher)
}

fn seeded() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.add_event("e1", "Gala", "u1", Some("Eve"));
    let a = backend.add_media("e1", "u1", "a.jpg");
    let b = backend.add_media("e1", "u2", "b.jpg");
    backend.add_media("e1", "u2", "c.jpg");
    backend.add_like(&a.id, "u2");
    backend.add_like(&a.id, "u3");
    backend.add_like(&b.id, "u3");
    backend
}

#[tokio::test]
async fn test_open_loads_and_projects() {
    let backend = seeded();
    let (session, _) = open(&backend, false).await;
    assert_eq!(session.event_id(), "e1");
    assert_eq!(session.projection().len(), 3);

    session.set_view(ViewState {
        sort_by: SortBy::MostLikes,
        only_mine: false,
    });
    let Projection::Flat(items) = session.projection() else {
        panic!("flat projection expected");
    };
    assert_eq!(items[0].display_name, "Eve");
    assert_eq!(items[0].likes_count, 2);

    session.set_view(ViewState {
        sort_by: SortBy::ByUser,
        only_mine: true,
    });
    let Projection::Grouped(groups) = session.projection() else {
        panic!("grouped projection expected");
    };
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].user_id, "u1");
    session.close().await;
}

#[tokio::test]
async fn test_open_fails_when_event_missing() {
    let backend = Arc::new(InMemoryBackend::new());
    let fetcher: Arc<dyn ImageFetcher> = Arc::new(CountingFetcher::default());
    let result = GallerySession::open(
        GalleryBackend::from_shared(backend),
        Arc::new(StaticIdentity(None)),
        fetcher,
        "missing",
        options(false),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_image_requests_download_once() {
    let backend = seeded();
    let (session, fetcher) = open(&backend, false).await;
    let item = session.repository().items()[0].clone();

    assert!(matches!(session.image(&item), CacheLookup::Pending));
    let (a, b) = tokio::join!(
        session.images().load(&item.id, &item.url),
        session.images().load(&item.id, &item.url)
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
    assert!(matches!(session.image(&item), CacheLookup::Ready(_)));

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_live_session_follows_changes() {
    let backend = seeded();
    let (mut session, _) = open(&backend, true).await;
    let mut errors = session.take_feed_errors().expect("errors receiver");
    for _ in 0..100 {
        if backend.subscriber_count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    backend.add_media("e2", "u9", "elsewhere.jpg");
    backend.add_media("e1", "u2", "new.jpg");
    backend.notify("media", ChangeOp::Insert);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.repository().items().len(), 4);
    assert!(errors.try_recv().is_err());

    session.close().await;
    assert_eq!(backend.subscriber_count(), 0);
}

#[tokio::test]
async fn test_upload_through_session() {
    let backend = seeded();
    let (session, _) = open(&backend, false).await;
    let mut notices = session.notices().subscribe();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("new.png");
    DynamicImage::ImageRgb8(RgbImage::new(32, 32))
        .save_with_format(&path, ImageFormat::Png)
        .unwrap();

    let summary = session.upload(vec![path], None).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(session.projection().len(), 4);
    assert_eq!(notices.try_recv().unwrap().message, "1 of 1 uploaded");
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_image_walks_variants() {
    let backend = seeded();
    let (session, fetcher) = open(&backend, false).await;
    let item = session.repository().items()[0].clone();

    match session.retry_image(&item).await {
        cache::FallbackOutcome::Loaded { image, .. } => assert_eq!(image.bytes, vec![1, 2, 3]),
        other => panic!("expected a loaded image, got {:?}", other),
    }
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
    session.close().await;
}
