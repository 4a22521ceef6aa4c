//! API client module for the event gallery backend.
//!
//! The backend exposes raw rows, binary objects and a payload-less change
//! feed. This crate defines the row types, the store traits consumed by the
//! sync engine and an HTTP implementation of all of them.

mod client;
mod sse;

pub use client::ApiClient;
pub use sse::SseDecoder;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Row kind stored for gallery photos.
pub const PHOTO_KIND: &str = "photo";

pub const EVENTS_TABLE: &str = "events";
pub const MEDIA_TABLE: &str = "media";
pub const LIKES_TABLE: &str = "likes";
pub const PARTICIPANTS_TABLE: &str = "event_participants";
pub const PROFILES_TABLE: &str = "profiles";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventRow {
    pub id: String,
    pub name: String,
    pub created_by: String,
    #[serde(default)]
    pub creator_display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MediaRow {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewMediaRow {
    pub event_id: String,
    pub user_id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl NewMediaRow {
    pub fn photo(event_id: &str, user_id: &str, url: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            url: url.to_string(),
            kind: PHOTO_KIND.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct LikeRow {
    pub media_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A table-level change notification. `record` is whatever the server sent
/// along and must not be relied upon.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "type")]
    pub operation: ChangeOp,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn new(table: &str, operation: ChangeOp) -> Self {
        Self {
            table: table.to_string(),
            operation,
            record: None,
        }
    }
}

/// Subscription scope: a table and an optional `column = value` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: String,
    pub eq: Option<(String, String)>,
}

impl FeedFilter {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            eq: None,
        }
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.eq = Some((column.to_string(), value.to_string()));
        self
    }

    /// Server-side filter expression, e.g. `event_id=eq.42`.
    pub fn expression(&self) -> Option<String> {
        self.eq
            .as_ref()
            .map(|(column, value)| format!("{}=eq.{}", column, value))
    }
}

/// Image bytes in transfer-safe (base64) form.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPayload {
    pub base64: String,
    pub content_type: String,
}

impl TransferPayload {
    pub fn encode(bytes: &[u8], content_type: &str) -> Self {
        Self {
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            content_type: content_type.to_string(),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, ApiClientError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.base64)
            .map_err(|e| ApiClientError::DecodeError(e.to_string()))
    }
}

/// Coarse error classification shared by every crate in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    NotFound,
    Permission,
    PartialBatchFailure,
    DegradedFeature,
    Other,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiClientError {
    #[error("Request Error: {0}")]
    RequestError(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("API Error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Decode Error: {0}")]
    DecodeError(String),
    #[error("Other Error: {0}")]
    Other(String),
}

impl ApiClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiClientError::RequestError(_) | ApiClientError::Timeout => {
                ErrorKind::TransientNetwork
            }
            ApiClientError::ApiError { status, .. }
                if *status == 408 || *status == 429 || *status >= 500 =>
            {
                ErrorKind::TransientNetwork
            }
            ApiClientError::NotFound(_) => ErrorKind::NotFound,
            ApiClientError::PermissionDenied(_) => ErrorKind::Permission,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }
}

/// An open change-feed subscription. Dropping it unsubscribes.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    cancel: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>, cancel: oneshot::Sender<()>) -> Self {
        Self {
            events,
            cancel: Some(cancel),
        }
    }

    /// Next notification, or `None` once the underlying stream has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}

/// Row-level access to the relational store.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn fetch_event(&self, event_id: &str) -> Result<EventRow, ApiClientError>;
    /// Media rows of `kind` for the event, newest first.
    async fn list_media(&self, event_id: &str, kind: &str) -> Result<Vec<MediaRow>, ApiClientError>;
    async fn insert_media(&self, row: &NewMediaRow) -> Result<MediaRow, ApiClientError>;
    async fn delete_media(&self, media_id: &str) -> Result<(), ApiClientError>;
    async fn list_likes(&self, media_ids: &[String]) -> Result<Vec<LikeRow>, ApiClientError>;
    async fn insert_like(&self, media_id: &str, user_id: &str) -> Result<(), ApiClientError>;
    async fn delete_like(&self, media_id: &str, user_id: &str) -> Result<(), ApiClientError>;
    /// Name snapshot taken when the user joined the event.
    async fn participant_display_name(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, ApiClientError>;
    async fn profile_display_name(&self, user_id: &str) -> Result<Option<String>, ApiClientError>;
    /// Privileged lookup for users hidden from direct reads by row policies.
    async fn lookup_display_name(&self, user_id: &str) -> Result<Option<String>, ApiClientError>;
}

/// Blob storage addressed by path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        path: &str,
        payload: &TransferPayload,
        upsert: bool,
    ) -> Result<(), ApiClientError>;
    fn public_url(&self, path: &str) -> String;
    async fn remove(&self, paths: &[String]) -> Result<(), ApiClientError>;
    /// Inverse of [`ObjectStore::public_url`].
    fn path_from_public_url(&self, url: &str) -> Option<String>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription, ApiClientError>;
}

/// Public URL layout shared by the HTTP client and test doubles.
pub fn public_object_url(base_url: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{}/{}",
        base_url.trim_end_matches('/'),
        bucket,
        path
    )
}

/// Extract the object path from a public URL for `bucket`. Query strings
/// are dropped and percent-encoding is undone.
pub fn storage_path_from_url(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("/{}/", bucket);
    let start = url.find(&marker)? + marker.len();
    let rest = &url[start..];
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    if rest.is_empty() {
        return None;
    }
    match urlencoding::decode(rest) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(rest.to_string()),
    }
}
