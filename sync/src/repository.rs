//! The authoritative media list for one event.

use crate::identity::{fallback_name, IdentityResolver};
use crate::{EventContext, GalleryState, MediaItem, SyncError};
use api_client::{LikeRow, MediaRow, NewMediaRow, RowStore, PHOTO_KIND};
use auth::IdentityProvider;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Loads media rows, merges names and like aggregates, and publishes the
/// result. The published list is only replaced wholesale by [`reload`];
/// [`patch_item`] and [`remove_item`] edit single items by id.
///
/// [`reload`]: MediaRepository::reload
/// [`patch_item`]: MediaRepository::patch_item
/// [`remove_item`]: MediaRepository::remove_item
pub struct MediaRepository {
    store: Arc<dyn RowStore>,
    identity: Arc<dyn IdentityProvider>,
    resolver: IdentityResolver,
    next_generation: AtomicU64,
    state: watch::Sender<GalleryState>,
}

impl MediaRepository {
    pub fn new(store: Arc<dyn RowStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        let resolver = IdentityResolver::new(store.clone(), identity.clone());
        let (state, _) = watch::channel(GalleryState::default());
        Self {
            store,
            identity,
            resolver,
            next_generation: AtomicU64::new(0),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<GalleryState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> GalleryState {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<MediaItem> {
        self.state.borrow().items.clone()
    }

    pub fn item(&self, media_id: &str) -> Option<MediaItem> {
        self.state.borrow().items.iter().find(|i| i.id == media_id).cloned()
    }

    pub fn event_context(&self) -> Option<EventContext> {
        self.state.borrow().event.clone()
    }

    pub fn current_principal_id(&self) -> Option<String> {
        self.identity.current_principal().map(|p| p.id)
    }

    /// Fetch and publish the media list for `event_id`.
    ///
    /// Safe to call concurrently: a result is published only if no reload
    /// started later has already published, so a slow stale reload finishes
    /// harmlessly. Event or media fetch failures leave the current list in
    /// place; like fetch failures degrade to zero likes.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn reload(&self, event_id: &str) -> Result<Vec<MediaItem>, SyncError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();

        let event: EventContext = self
            .store
            .fetch_event(event_id)
            .await
            .map_err(|e| {
                tracing::warn!(event_id, error = %e, "Failed to load event");
                SyncError::ApiClientError(e)
            })?
            .into();

        let rows: Vec<MediaRow> = self
            .store
            .list_media(event_id, PHOTO_KIND)
            .await
            .map_err(|e| {
                tracing::warn!(event_id, error = %e, "Failed to load media");
                SyncError::ApiClientError(e)
            })?
            .into_iter()
            .filter(|r| r.event_id == event_id)
            .collect();

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let (likes, likes_degraded) = match self.store.list_likes(&ids).await {
            Ok(likes) => (likes, false),
            Err(e) => {
                tracing::warn!(event_id, error = %e, "Likes unavailable, showing zero likes");
                (Vec::new(), true)
            }
        };

        let uploaders: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
        let names = self.resolver.resolve_many(&uploaders, &event).await;
        let principal_id = self.current_principal_id();
        let items = aggregate(rows, &likes, &names, principal_id.as_deref());

        let published = self.state.send_if_modified(|state| {
            if generation <= state.generation {
                return false;
            }
            *state = GalleryState {
                event: Some(event.clone()),
                items: items.clone(),
                generation,
                likes_degraded,
            };
            true
        });
        if published {
            tracing::info!(
                event_id,
                generation,
                "items" = items.len(),
                "reload_time_ms" = %start.elapsed().as_millis(),
                "Gallery reloaded"
            );
        } else {
            tracing::debug!(event_id, generation, "Discarding superseded reload");
        }
        Ok(items)
    }

    /// Apply `f` to the item with `media_id`. Returns the item as it was
    /// before the patch, or `None` if it is not in the list.
    pub fn patch_item<F>(&self, media_id: &str, f: F) -> Option<MediaItem>
    where
        F: FnOnce(&mut MediaItem),
    {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            let Some(item) = state.items.iter_mut().find(|i| i.id == media_id) else {
                return false;
            };
            previous = Some(item.clone());
            f(item);
            true
        });
        previous
    }

    pub fn remove_item(&self, media_id: &str) -> Option<MediaItem> {
        let mut removed = None;
        self.state.send_if_modified(|state| {
            let Some(pos) = state.items.iter().position(|i| i.id == media_id) else {
                return false;
            };
            removed = Some(state.items.remove(pos));
            true
        });
        removed
    }

    pub async fn insert_media(&self, row: &NewMediaRow) -> Result<MediaRow, SyncError> {
        Ok(self.store.insert_media(row).await?)
    }

    pub async fn delete_media(&self, media_id: &str) -> Result<(), SyncError> {
        Ok(self.store.delete_media(media_id).await?)
    }

    pub async fn set_like(
        &self,
        media_id: &str,
        user_id: &str,
        liked: bool,
    ) -> Result<(), SyncError> {
        if liked {
            self.store.insert_like(media_id, user_id).await?;
        } else {
            self.store.delete_like(media_id, user_id).await?;
        }
        Ok(())
    }
}

/// Merge names and like counts into view items, newest first.
fn aggregate(
    rows: Vec<MediaRow>,
    likes: &[LikeRow],
    names: &HashMap<String, String>,
    principal_id: Option<&str>,
) -> Vec<MediaItem> {
    let unique: HashSet<&LikeRow> = likes.iter().collect();
    let mut counts: HashMap<&str, u32> = HashMap::new();
    let mut liked_by_me: HashSet<&str> = HashSet::new();
    for like in unique {
        *counts.entry(like.media_id.as_str()).or_insert(0) += 1;
        if Some(like.user_id.as_str()) == principal_id {
            liked_by_me.insert(like.media_id.as_str());
        }
    }

    let mut items: Vec<MediaItem> = rows
        .into_iter()
        .map(|row| {
            let likes_count = counts.get(row.id.as_str()).copied().unwrap_or(0);
            let user_has_liked = liked_by_me.contains(row.id.as_str());
            let display_name = names
                .get(&row.user_id)
                .cloned()
                .unwrap_or_else(|| fallback_name(&row.user_id));
            MediaItem::from_row(row, display_name, likes_count, user_has_liked)
        })
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(id: &str, user: &str, secs: i64) -> MediaRow {
        MediaRow {
            id: id.into(),
            event_id: "e1".into(),
            user_id: user.into(),
            url: format!("https://x/{}.jpg", id),
            kind: PHOTO_KIND.into(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn like(media: &str, user: &str) -> LikeRow {
        LikeRow {
            media_id: media.into(),
            user_id: user.into(),
        }
    }

    #[test]
    fn test_aggregate_counts_and_flags() {
        let rows = vec![row("a", "u1", 10), row("b", "u2", 20)];
        let likes = vec![like("a", "u1"), like("a", "u2"), like("a", "u2"), like("b", "u3")];
        let names = HashMap::from([("u1".to_string(), "Ann".to_string())]);
        let items = aggregate(rows, &likes, &names, Some("u2"));
        assert_eq!(items[0].id, "b");
        assert_eq!(items[0].likes_count, 1);
        assert!(!items[0].user_has_liked);
        assert_eq!(items[0].display_name, "User u2");
        assert_eq!(items[1].likes_count, 2);
        assert!(items[1].user_has_liked);
        assert_eq!(items[1].display_name, "Ann");
    }

    #[test]
    fn test_aggregate_without_principal() {
        let items = aggregate(vec![row("a", "u1", 1)], &[like("a", "u1")], &HashMap::new(), None);
        assert_eq!(items[0].likes_count, 1);
        assert!(!items[0].user_has_liked);
    }
}
