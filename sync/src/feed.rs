//! Change-feed driven reloads.
//!
//! Notifications carry no usable payload, so every one of them (after
//! debouncing) turns into a full [`MediaRepository::reload`] of the current
//! event.

use crate::{MediaRepository, SyncTaskError};
use api_client::{ApiClientError, ChangeFeed, FeedFilter, Subscription, LIKES_TABLE, MEDIA_TABLE};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Notifications within this window collapse into one reload. Zero
    /// reloads on every notification.
    pub debounce: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Running listener. Dropping the handle without calling
/// [`FeedHandle::shutdown`] also stops it, but without waiting.
pub struct FeedHandle {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FeedHandle {
    /// Unsubscribe and wait for the listener task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

enum Wake {
    Shutdown,
    Changed,
    Closed,
}

struct Feeds {
    media: Subscription,
    likes: Subscription,
}

impl Feeds {
    async fn next(&mut self, shutdown: &mut oneshot::Receiver<()>) -> Wake {
        tokio::select! {
            _ = shutdown => Wake::Shutdown,
            ev = self.media.next() => match ev {
                Some(_) => Wake::Changed,
                None => Wake::Closed,
            },
            ev = self.likes.next() => match ev {
                Some(_) => Wake::Changed,
                None => Wake::Closed,
            },
        }
    }
}

pub struct ChangeFeedListener {
    feed: Arc<dyn ChangeFeed>,
    repository: Arc<MediaRepository>,
    config: FeedConfig,
}

impl ChangeFeedListener {
    pub fn new(feed: Arc<dyn ChangeFeed>, repository: Arc<MediaRepository>) -> Self {
        Self::with_config(feed, repository, FeedConfig::default())
    }

    pub fn with_config(
        feed: Arc<dyn ChangeFeed>,
        repository: Arc<MediaRepository>,
        config: FeedConfig,
    ) -> Self {
        Self {
            feed,
            repository,
            config,
        }
    }

    async fn connect(&self, event_id: &str) -> Result<Feeds, ApiClientError> {
        let media = self
            .feed
            .subscribe(FeedFilter::table(MEDIA_TABLE).eq("event_id", event_id))
            .await?;
        // likes cannot be filtered by event server-side
        let likes = self.feed.subscribe(FeedFilter::table(LIKES_TABLE)).await?;
        Ok(Feeds { media, likes })
    }

    async fn reload(&self, event_id: &str, errors: &Option<mpsc::UnboundedSender<SyncTaskError>>) {
        if let Err(e) = self.repository.reload(event_id).await {
            tracing::error!(event_id, error = %e, "Change-triggered reload failed");
            if let Some(tx) = errors {
                if let Err(send_err) = tx.send(SyncTaskError::ReloadFailed(e.to_string())) {
                    tracing::error!(error = ?send_err, "Failed to forward reload error");
                }
            }
        }
    }

    /// Start listening for changes to `event_id`.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self, errors)))]
    pub fn start(
        self,
        event_id: String,
        errors: Option<mpsc::UnboundedSender<SyncTaskError>>,
    ) -> FeedHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let listener = self;
            let mut backoff = listener.config.initial_backoff;
            let mut reconnecting = false;
            'connect: loop {
                let mut feeds = match listener.connect(&event_id).await {
                    Ok(feeds) => feeds,
                    Err(e) => {
                        let wait = backoff.min(listener.config.max_backoff);
                        tracing::warn!(
                            event_id = %event_id,
                            error = %e,
                            backoff_ms = %wait.as_millis(),
                            "Change feed subscribe failed"
                        );
                        if let Some(tx) = &errors {
                            let _ = tx.send(SyncTaskError::FeedDisconnected(e.to_string()));
                        }
                        backoff = (backoff * 2).min(listener.config.max_backoff);
                        tokio::select! {
                            _ = &mut shutdown_rx => break 'connect,
                            _ = sleep(wait) => continue 'connect,
                        }
                    }
                };
                backoff = listener.config.initial_backoff;
                tracing::info!(event_id = %event_id, "Change feed connected");
                if reconnecting {
                    // changes made while disconnected were never notified
                    listener.reload(&event_id, &errors).await;
                }
                reconnecting = true;

                loop {
                    match feeds.next(&mut shutdown_rx).await {
                        Wake::Shutdown => break 'connect,
                        Wake::Closed => {
                            tracing::info!(
                                event_id = %event_id,
                                "Change feed closed, reconnecting"
                            );
                            tokio::select! {
                                _ = &mut shutdown_rx => break 'connect,
                                _ = sleep(listener.config.initial_backoff) => continue 'connect,
                            }
                        }
                        Wake::Changed => {}
                    }

                    let mut closed = false;
                    if !listener.config.debounce.is_zero() {
                        let deadline = Instant::now() + listener.config.debounce;
                        loop {
                            tokio::select! {
                                _ = tokio::time::sleep_until(deadline) => break,
                                wake = feeds.next(&mut shutdown_rx) => match wake {
                                    Wake::Shutdown => break 'connect,
                                    Wake::Closed => {
                                        closed = true;
                                        break;
                                    }
                                    Wake::Changed => {}
                                },
                            }
                        }
                    }

                    listener.reload(&event_id, &errors).await;
                    if closed {
                        tokio::select! {
                            _ = &mut shutdown_rx => break 'connect,
                            _ = sleep(listener.config.initial_backoff) => continue 'connect,
                        }
                    }
                }
            }
            tracing::info!(event_id = %event_id, "Change feed listener stopped");
        });
        FeedHandle {
            handle: Some(handle),
            shutdown: Some(shutdown_tx),
        }
    }
}
