//! In-memory image cache keyed by media id.

use crate::fetcher::ImageFetcher;
use crate::url_ladder::normalize_url;
use crate::{CachedImage, ImageCacheError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

type LoadResult = Result<Arc<CachedImage>, ImageCacheError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum CacheLookup {
    Ready(Arc<CachedImage>),
    /// Not cached yet; a download is running and observers will be told.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageEvent {
    Loaded(String),
    Failed(String, ImageCacheError),
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Arc<CachedImage>>,
    recency: VecDeque<String>,
    inflight: HashMap<String, SharedLoad>,
    /// Bumped by `clear`; loads started before it are not stored.
    generation: u64,
}

impl State {
    fn touch(&mut self, id: &str) -> Option<Arc<CachedImage>> {
        let hit = self.entries.get(id)?.clone();
        if let Some(pos) = self.recency.iter().position(|k| k == id) {
            if let Some(key) = self.recency.remove(pos) {
                self.recency.push_back(key);
            }
        }
        Some(hit)
    }

    /// First writer wins; returns whatever ends up stored.
    fn insert_once(
        &mut self,
        id: &str,
        image: Arc<CachedImage>,
        capacity: Option<usize>,
    ) -> Arc<CachedImage> {
        if let Some(existing) = self.entries.get(id) {
            return existing.clone();
        }
        self.entries.insert(id.to_string(), image.clone());
        self.recency.push_back(id.to_string());
        if let Some(cap) = capacity {
            while self.entries.len() > cap.max(1) {
                let Some(oldest) = self.recency.pop_front() else { break };
                self.entries.remove(&oldest);
                tracing::debug!(media_id = %oldest, "Evicted cached image");
            }
        }
        image
    }
}

struct Inner {
    fetcher: Arc<dyn ImageFetcher>,
    capacity: Option<usize>,
    state: Mutex<State>,
    events: broadcast::Sender<ImageEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(
        &self,
        id: &str,
        generation: u64,
        result: Result<CachedImage, ImageCacheError>,
    ) -> LoadResult {
        let mut state = self.lock();
        let current = state.generation == generation;
        if current {
            state.inflight.remove(id);
        }
        match result {
            Ok(image) if !current => {
                drop(state);
                tracing::debug!(media_id = %id, "Dropping image loaded before clear");
                Ok(Arc::new(image))
            }
            Ok(image) => {
                let stored = state.insert_once(id, Arc::new(image), self.capacity);
                drop(state);
                let _ = self.events.send(ImageEvent::Loaded(id.to_string()));
                Ok(stored)
            }
            Err(e) => {
                drop(state);
                tracing::debug!(media_id = %id, error = %e, "Image load failed");
                let _ = self.events.send(ImageEvent::Failed(id.to_string(), e.clone()));
                Err(e)
            }
        }
    }
}

/// Decoded images for the gallery session. Cloning shares the cache.
///
/// Concurrent requests for the same id share one download. Failed loads
/// leave no entry behind, so a later request retries.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

impl ImageCache {
    /// Unbounded cache.
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self::with_capacity(fetcher, None)
    }

    /// `Some(n)` keeps at most `n` images, evicting the least recently read.
    pub fn with_capacity(fetcher: Arc<dyn ImageFetcher>, capacity: Option<usize>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                fetcher,
                capacity,
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImageEvent> {
        self.inner.events.subscribe()
    }

    pub fn cached(&self, media_id: &str) -> Option<Arc<CachedImage>> {
        self.inner.lock().touch(media_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry; called when the gallery session ends.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.recency.clear();
        state.inflight.clear();
        state.generation += 1;
    }

    /// Synchronous lookup. On a miss this starts a background download
    /// (unless one is already running) and returns [`CacheLookup::Pending`].
    /// Must be called from within a Tokio runtime.
    pub fn get(&self, media_id: &str, url: &str) -> CacheLookup {
        let (load, started) = {
            let mut state = self.inner.lock();
            if let Some(hit) = state.touch(media_id) {
                return CacheLookup::Ready(hit);
            }
            self.inflight_or_start(&mut state, media_id, url)
        };
        if started {
            tokio::spawn(async move {
                let _ = load.await;
            });
        }
        CacheLookup::Pending
    }

    /// Resolve the image for `media_id`, downloading it if needed.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn load(
        &self,
        media_id: &str,
        url: &str,
    ) -> Result<Arc<CachedImage>, ImageCacheError> {
        let load = {
            let mut state = self.inner.lock();
            if let Some(hit) = state.touch(media_id) {
                return Ok(hit);
            }
            self.inflight_or_start(&mut state, media_id, url).0
        };
        load.await
    }

    fn inflight_or_start(
        &self,
        state: &mut State,
        media_id: &str,
        url: &str,
    ) -> (SharedLoad, bool) {
        if let Some(existing) = state.inflight.get(media_id) {
            return (existing.clone(), false);
        }
        let inner = self.inner.clone();
        let id = media_id.to_string();
        let normalized = normalize_url(url);
        let generation = state.generation;
        let load = async move {
            let result = inner.fetcher.fetch(&normalized).await;
            inner.finish(&id, generation, result)
        }
        .boxed()
        .shared();
        state.inflight.insert(media_id.to_string(), load.clone());
        (load, true)
    }
}
