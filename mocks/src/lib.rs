//! In-memory stand-in for the gallery backend, used by tests across the
//! workspace. Implements every store trait and supports failure injection.

use api_client::{
    public_object_url, storage_path_from_url, ApiClientError, ChangeEvent, ChangeFeed, ChangeOp,
    EventRow, FeedFilter, LikeRow, MediaRow, NewMediaRow, ObjectStore, RowStore, Subscription,
    TransferPayload, LIKES_TABLE, MEDIA_TABLE,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const MOCK_BASE_URL: &str = "https://mock.local";
pub const MOCK_BUCKET: &str = "event-photos";

/// Switches for simulated backend failures.
#[derive(Debug, Default, Clone)]
pub struct Failures {
    pub fetch_event: bool,
    pub list_media: bool,
    pub likes_unavailable: bool,
    pub like_writes: bool,
    pub insert_media: bool,
    pub delete_media: HashSet<String>,
    pub upload: bool,
    /// Object paths whose removal fails.
    pub remove_objects: HashSet<String>,
    pub participants: bool,
    pub profiles: bool,
    pub lookup: bool,
}

#[derive(Default)]
struct State {
    events: HashMap<String, EventRow>,
    media: Vec<MediaRow>,
    likes: HashSet<LikeRow>,
    participants: HashMap<(String, String), String>,
    profiles: HashMap<String, String>,
    rpc_names: HashMap<String, String>,
    objects: HashMap<String, Vec<u8>>,
    next_id: u64,
    ticks: i64,
    failures: Failures,
    calls: HashMap<&'static str, usize>,
    media_delays: VecDeque<Duration>,
    like_write_delay: Option<Duration>,
}

impl State {
    fn now(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()
            + ChronoDuration::seconds(self.ticks)
    }

    fn count(&mut self, call: &'static str) {
        *self.calls.entry(call).or_insert(0) += 1;
    }
}

pub struct InMemoryBackend {
    state: Mutex<State>,
    subscribers: Mutex<Vec<(FeedFilter, mpsc::UnboundedSender<ChangeEvent>)>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable(what: &str) -> ApiClientError {
    ApiClientError::ApiError {
        status: 503,
        message: format!("{} unavailable", what),
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_event(
        &self,
        id: &str,
        name: &str,
        created_by: &str,
        creator_display_name: Option<&str>,
    ) {
        self.lock().events.insert(
            id.to_string(),
            EventRow {
                id: id.to_string(),
                name: name.to_string(),
                created_by: created_by.to_string(),
                creator_display_name: creator_display_name.map(str::to_string),
            },
        );
    }

    /// Seed a photo row together with its stored object.
    pub fn add_media(&self, event_id: &str, user_id: &str, file_name: &str) -> MediaRow {
        let mut state = self.lock();
        state.next_id += 1;
        let path = format!("{}/{}", event_id, file_name);
        state.objects.insert(path.clone(), b"seed".to_vec());
        let row = MediaRow {
            id: format!("m{}", state.next_id),
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            url: public_object_url(MOCK_BASE_URL, MOCK_BUCKET, &path),
            kind: api_client::PHOTO_KIND.to_string(),
            created_at: state.now(),
        };
        state.media.push(row.clone());
        row
    }

    pub fn add_like(&self, media_id: &str, user_id: &str) {
        self.lock().likes.insert(LikeRow {
            media_id: media_id.to_string(),
            user_id: user_id.to_string(),
        });
    }

    pub fn set_participant_name(&self, event_id: &str, user_id: &str, name: &str) {
        self.lock()
            .participants
            .insert((event_id.to_string(), user_id.to_string()), name.to_string());
    }

    pub fn set_profile_name(&self, user_id: &str, name: &str) {
        self.lock().profiles.insert(user_id.to_string(), name.to_string());
    }

    pub fn set_lookup_name(&self, user_id: &str, name: &str) {
        self.lock().rpc_names.insert(user_id.to_string(), name.to_string());
    }

    pub fn fail<F: FnOnce(&mut Failures)>(&self, f: F) {
        f(&mut self.lock().failures);
    }

    /// Delay the next `list_media` calls, one entry per call.
    pub fn delay_media_lists(&self, delays: &[Duration]) {
        self.lock().media_delays.extend(delays.iter().copied());
    }

    /// Delay every like insert/delete by `delay`.
    pub fn delay_like_writes(&self, delay: Duration) {
        self.lock().like_write_delay = Some(delay);
    }

    async fn like_write_pause(&self) {
        let delay = self.lock().like_write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn calls(&self, call: &str) -> usize {
        self.lock().calls.get(call).copied().unwrap_or(0)
    }

    pub fn media_rows(&self, event_id: &str) -> Vec<MediaRow> {
        self.lock()
            .media
            .iter()
            .filter(|m| m.event_id == event_id)
            .cloned()
            .collect()
    }

    pub fn like_count(&self, media_id: &str) -> usize {
        self.lock().likes.iter().filter(|l| l.media_id == media_id).count()
    }

    pub fn has_object(&self, path: &str) -> bool {
        self.lock().objects.contains_key(path)
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(path).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|(_, tx)| !tx.is_closed());
        subs.len()
    }

    /// Push a payload-less notification to every subscriber of `table`,
    /// ignoring their filters (the server over-notifies).
    pub fn notify(&self, table: &str, op: ChangeOp) {
        let subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for (filter, tx) in subs.iter() {
            if filter.table == table {
                let _ = tx.send(ChangeEvent::new(table, op));
            }
        }
    }

    /// Close every open subscription stream, as a dropped connection would.
    pub fn drop_connections(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn emit(&self, table: &str, op: ChangeOp, record: serde_json::Value) {
        let subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for (filter, tx) in subs.iter() {
            if filter.table != table {
                continue;
            }
            if let Some((column, value)) = &filter.eq {
                if record.get(column).and_then(|v| v.as_str()) != Some(value.as_str()) {
                    continue;
                }
            }
            let _ = tx.send(ChangeEvent {
                table: table.to_string(),
                operation: op,
                record: Some(record.clone()),
            });
        }
    }
}

#[async_trait]
impl RowStore for InMemoryBackend {
    async fn fetch_event(&self, event_id: &str) -> Result<EventRow, ApiClientError> {
        let mut state = self.lock();
        state.count("fetch_event");
        if state.failures.fetch_event {
            return Err(unavailable("events"));
        }
        state
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| ApiClientError::NotFound(format!("event {}", event_id)))
    }

    async fn list_media(
        &self,
        event_id: &str,
        kind: &str,
    ) -> Result<Vec<MediaRow>, ApiClientError> {
        let delay = {
            let mut state = self.lock();
            state.count("list_media");
            state.media_delays.pop_front()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.lock();
        if state.failures.list_media {
            return Err(unavailable("media"));
        }
        let mut rows: Vec<MediaRow> = state
            .media
            .iter()
            .filter(|m| m.event_id == event_id && m.kind == kind)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_media(&self, row: &NewMediaRow) -> Result<MediaRow, ApiClientError> {
        let inserted = {
            let mut state = self.lock();
            state.count("insert_media");
            if state.failures.insert_media {
                return Err(unavailable("media insert"));
            }
            state.next_id += 1;
            let inserted = MediaRow {
                id: format!("m{}", state.next_id),
                event_id: row.event_id.clone(),
                user_id: row.user_id.clone(),
                url: row.url.clone(),
                kind: row.kind.clone(),
                created_at: state.now(),
            };
            state.media.push(inserted.clone());
            inserted
        };
        self.emit(
            MEDIA_TABLE,
            ChangeOp::Insert,
            json!({"id": inserted.id, "event_id": inserted.event_id}),
        );
        Ok(inserted)
    }

    async fn delete_media(&self, media_id: &str) -> Result<(), ApiClientError> {
        let removed = {
            let mut state = self.lock();
            state.count("delete_media");
            if state.failures.delete_media.contains(media_id) {
                return Err(ApiClientError::PermissionDenied(format!("media {}", media_id)));
            }
            let Some(pos) = state.media.iter().position(|m| m.id == media_id) else {
                return Err(ApiClientError::NotFound(format!("media {}", media_id)));
            };
            let removed = state.media.remove(pos);
            state.likes.retain(|l| l.media_id != media_id);
            removed
        };
        self.emit(
            MEDIA_TABLE,
            ChangeOp::Delete,
            json!({"id": removed.id, "event_id": removed.event_id}),
        );
        Ok(())
    }

    async fn list_likes(&self, media_ids: &[String]) -> Result<Vec<LikeRow>, ApiClientError> {
        let mut state = self.lock();
        state.count("list_likes");
        if state.failures.likes_unavailable {
            return Err(ApiClientError::NotFound("relation \"likes\" does not exist".into()));
        }
        Ok(state
            .likes
            .iter()
            .filter(|l| media_ids.contains(&l.media_id))
            .cloned()
            .collect())
    }

    async fn insert_like(&self, media_id: &str, user_id: &str) -> Result<(), ApiClientError> {
        self.like_write_pause().await;
        {
            let mut state = self.lock();
            state.count("insert_like");
            if state.failures.like_writes || state.failures.likes_unavailable {
                return Err(unavailable("likes"));
            }
            state.likes.insert(LikeRow {
                media_id: media_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        self.emit(LIKES_TABLE, ChangeOp::Insert, json!({"media_id": media_id}));
        Ok(())
    }

    async fn delete_like(&self, media_id: &str, user_id: &str) -> Result<(), ApiClientError> {
        self.like_write_pause().await;
        {
            let mut state = self.lock();
            state.count("delete_like");
            if state.failures.like_writes || state.failures.likes_unavailable {
                return Err(unavailable("likes"));
            }
            state
                .likes
                .retain(|l| !(l.media_id == media_id && l.user_id == user_id));
        }
        self.emit(LIKES_TABLE, ChangeOp::Delete, json!({"media_id": media_id}));
        Ok(())
    }

    async fn participant_display_name(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, ApiClientError> {
        let mut state = self.lock();
        state.count("participant_display_name");
        if state.failures.participants {
            return Err(ApiClientError::PermissionDenied("participants".into()));
        }
        Ok(state
            .participants
            .get(&(event_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn profile_display_name(&self, user_id: &str) -> Result<Option<String>, ApiClientError> {
        let mut state = self.lock();
        state.count("profile_display_name");
        if state.failures.profiles {
            return Err(ApiClientError::PermissionDenied("profiles".into()));
        }
        Ok(state.profiles.get(user_id).cloned())
    }

    async fn lookup_display_name(&self, user_id: &str) -> Result<Option<String>, ApiClientError> {
        let mut state = self.lock();
        state.count("lookup_display_name");
        if state.failures.lookup {
            return Err(unavailable("rpc"));
        }
        Ok(state.rpc_names.get(user_id).cloned())
    }
}

#[async_trait]
impl ObjectStore for InMemoryBackend {
    async fn upload(
        &self,
        path: &str,
        payload: &TransferPayload,
        upsert: bool,
    ) -> Result<(), ApiClientError> {
        let bytes = payload.decode()?;
        let mut state = self.lock();
        state.count("upload");
        if state.failures.upload {
            return Err(unavailable("storage"));
        }
        if !upsert && state.objects.contains_key(path) {
            return Err(ApiClientError::ApiError {
                status: 409,
                message: "The resource already exists".into(),
            });
        }
        state.objects.insert(path.to_string(), bytes);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        public_object_url(MOCK_BASE_URL, MOCK_BUCKET, path)
    }

    async fn remove(&self, paths: &[String]) -> Result<(), ApiClientError> {
        let mut state = self.lock();
        state.count("remove");
        if let Some(bad) = paths.iter().find(|p| state.failures.remove_objects.contains(*p)) {
            return Err(ApiClientError::PermissionDenied(format!("object {}", bad)));
        }
        for path in paths {
            state.objects.remove(path);
        }
        Ok(())
    }

    fn path_from_public_url(&self, url: &str) -> Option<String> {
        storage_path_from_url(url, MOCK_BUCKET)
    }
}

#[async_trait]
impl ChangeFeed for InMemoryBackend {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription, ApiClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, _cancel_rx) = oneshot::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((filter, tx));
        // The receiving half is closed when the subscription drops, which
        // `subscriber_count` observes.
        Ok(Subscription::new(rx, cancel_tx))
    }
}
