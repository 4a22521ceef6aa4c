use crate::mutations::MutationCoordinator;
use crate::notices::NoticeBus;
use crate::sort_filter::{project, Projection, ViewState};
use api_client::{ChangeFeed, ObjectStore, RowStore};
use auth::IdentityProvider;
use cache::{CacheLookup, FallbackLoader, FallbackOutcome, ImageCache, ImageFetcher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use sync::{
    ChangeFeedListener, FeedConfig, FeedHandle, GalleryState, MediaItem, MediaRepository, SyncError,
    SyncTaskError,
};
use tokio::sync::{mpsc, watch};
use upload::{
    UploadError, UploadPipeline, UploadProgress, UploadSummary, DEFAULT_UPLOAD_CONCURRENCY,
};

/// The three backend seams a session talks to.
#[derive(Clone)]
pub struct GalleryBackend {
    pub rows: Arc<dyn RowStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl GalleryBackend {
    /// Use one value for all three seams.
    pub fn from_shared<T>(backend: Arc<T>) -> Self
    where
        T: RowStore + ObjectStore + ChangeFeed + 'static,
    {
        Self {
            rows: backend.clone(),
            objects: backend.clone(),
            feed: backend,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub feed: FeedConfig,
    /// Start the change-feed listener on open.
    pub live: bool,
    pub upload_concurrency: usize,
    pub image_cache_capacity: Option<usize>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            live: true,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            image_cache_capacity: None,
        }
    }
}

/// One open event gallery: repository, live updates, uploads, mutations,
/// image cache and notices, torn down together by [`GallerySession::close`].
pub struct GallerySession {
    event_id: String,
    repository: Arc<MediaRepository>,
    uploads: UploadPipeline,
    mutations: MutationCoordinator,
    images: ImageCache,
    fallback: FallbackLoader,
    notices: NoticeBus,
    view: Mutex<ViewState>,
    feed: Option<FeedHandle>,
    feed_errors: Option<mpsc::UnboundedReceiver<SyncTaskError>>,
}

impl GallerySession {
    /// Load `event_id` and, if `options.live`, start following changes.
    pub async fn open(
        backend: GalleryBackend,
        identity: Arc<dyn IdentityProvider>,
        fetcher: Arc<dyn ImageFetcher>,
        event_id: &str,
        options: SessionOptions,
    ) -> Result<Self, SyncError> {
        let repository = Arc::new(MediaRepository::new(backend.rows.clone(), identity));
        repository.reload(event_id).await?;

        let notices = NoticeBus::new();
        let uploads = UploadPipeline::new(repository.clone(), backend.objects.clone())
            .with_concurrency(options.upload_concurrency);
        let mutations =
            MutationCoordinator::new(repository.clone(), backend.objects.clone(), notices.clone());
        let fallback = FallbackLoader::new(fetcher.clone());
        let images = ImageCache::with_capacity(fetcher, options.image_cache_capacity);

        let (feed, feed_errors) = if options.live {
            let (tx, rx) = mpsc::unbounded_channel();
            let listener = ChangeFeedListener::with_config(
                backend.feed.clone(),
                repository.clone(),
                options.feed,
            );
            (Some(listener.start(event_id.to_string(), Some(tx))), Some(rx))
        } else {
            (None, None)
        };

        tracing::info!(event_id, live = options.live, "Gallery session opened");
        Ok(Self {
            event_id: event_id.to_string(),
            repository,
            uploads,
            mutations,
            images,
            fallback,
            notices,
            view: Mutex::new(ViewState::default()),
            feed,
            feed_errors,
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn repository(&self) -> &Arc<MediaRepository> {
        &self.repository
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    pub fn notices(&self) -> &NoticeBus {
        &self.notices
    }

    pub fn subscribe(&self) -> watch::Receiver<GalleryState> {
        self.repository.subscribe()
    }

    /// Errors from the change-feed listener. Can be taken once.
    pub fn take_feed_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SyncTaskError>> {
        self.feed_errors.take()
    }

    pub async fn reload(&self) -> Result<Vec<MediaItem>, SyncError> {
        self.repository.reload(&self.event_id).await
    }

    pub fn view(&self) -> ViewState {
        *self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_view(&self, view: ViewState) {
        *self.view.lock().unwrap_or_else(|e| e.into_inner()) = view;
    }

    /// The current list, filtered and sorted by the current view.
    pub fn projection(&self) -> Projection {
        let items = self.repository.items();
        let principal = self.repository.current_principal_id();
        project(&items, &self.view(), principal.as_deref())
    }

    pub fn image(&self, item: &MediaItem) -> CacheLookup {
        self.images.get(&item.id, &item.url)
    }

    /// Retry an image that failed to load by walking the URL variants.
    pub async fn retry_image(&self, item: &MediaItem) -> FallbackOutcome {
        self.fallback.load(&item.url).await
    }

    pub async fn upload(
        &self,
        assets: Vec<PathBuf>,
        progress: Option<mpsc::UnboundedSender<UploadProgress>>,
    ) -> Result<UploadSummary, UploadError> {
        let summary = self.uploads.upload(&self.event_id, assets, progress).await?;
        let message = format!("{} of {} uploaded", summary.succeeded, summary.total());
        if summary.failed > 0 {
            self.notices.warn(message);
        } else if summary.succeeded > 0 {
            self.notices.info(message);
        }
        Ok(summary)
    }

    /// Stop following changes and drop cached images.
    pub async fn close(mut self) {
        if let Some(feed) = self.feed.take() {
            feed.shutdown().await;
        }
        self.images.clear();
        tracing::info!(event_id = %self.event_id, "Gallery session closed");
    }
}
