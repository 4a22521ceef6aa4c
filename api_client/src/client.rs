//! HTTP implementation of the store traits.

use crate::{
    public_object_url, storage_path_from_url, ApiClientError, ChangeEvent, ChangeFeed, EventRow,
    FeedFilter, LikeRow, MediaRow, NewMediaRow, ObjectStore, RowStore, SseDecoder, Subscription,
    TransferPayload, EVENTS_TABLE, LIKES_TABLE, MEDIA_TABLE, PARTICIPANTS_TABLE, PROFILES_TABLE,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

const DEFAULT_BUCKET: &str = "event-photos";

#[derive(Debug, Deserialize)]
struct NameRow {
    display_name: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    bucket: String,
}

impl ApiClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self::with_client(base_url, api_key, reqwest::Client::new())
    }

    /// Create a client around a preconfigured `reqwest::Client`, e.g. one
    /// with a request timeout.
    pub fn with_client(base_url: String, api_key: String, client: reqwest::Client) -> Self {
        ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            access_token: None,
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    pub fn set_access_token(&mut self, token: String) {
        self.access_token = Some(token);
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        builder
            .header("apikey", &self.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
    }

    fn rest(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiClientError> {
        let response = self.authed(builder).send().await.map_err(map_transport)?;
        check_status(response).await
    }

    async fn get_rows<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ApiClientError> {
        let response = self.send(self.client.get(self.rest(table)).query(query)).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| ApiClientError::DecodeError(e.to_string()))
    }
}

fn map_transport(e: reqwest::Error) -> ApiClientError {
    if e.is_timeout() {
        ApiClientError::Timeout
    } else {
        ApiClientError::RequestError(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, ApiClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(match status {
        StatusCode::NOT_FOUND => ApiClientError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiClientError::PermissionDenied(message)
        }
        _ => ApiClientError::ApiError {
            status: status.as_u16(),
            message,
        },
    })
}

fn in_list(ids: &[String]) -> String {
    format!("in.({})", ids.join(","))
}

#[async_trait]
impl RowStore for ApiClient {
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    async fn fetch_event(&self, event_id: &str) -> Result<EventRow, ApiClientError> {
        let rows: Vec<EventRow> = self
            .get_rows(
                EVENTS_TABLE,
                &[
                    ("select", "id,name,created_by,creator_display_name".to_string()),
                    ("id", format!("eq.{}", event_id)),
                ],
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiClientError::NotFound(format!("event {}", event_id)))
    }

    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    async fn list_media(
        &self,
        event_id: &str,
        kind: &str,
    ) -> Result<Vec<MediaRow>, ApiClientError> {
        self.get_rows(
            MEDIA_TABLE,
            &[
                ("select", "*".to_string()),
                ("event_id", format!("eq.{}", event_id)),
                ("type", format!("eq.{}", kind)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn insert_media(&self, row: &NewMediaRow) -> Result<MediaRow, ApiClientError> {
        let response = self
            .send(
                self.client
                    .post(self.rest(MEDIA_TABLE))
                    .header("Prefer", "return=representation")
                    .json(row),
            )
            .await?;
        let rows: Vec<MediaRow> = response
            .json()
            .await
            .map_err(|e| ApiClientError::DecodeError(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiClientError::Other("No media row returned".into()))
    }

    async fn delete_media(&self, media_id: &str) -> Result<(), ApiClientError> {
        let response = self
            .send(
                self.client
                    .delete(self.rest(MEDIA_TABLE))
                    .query(&[("id", format!("eq.{}", media_id))])
                    .header("Prefer", "return=representation"),
            )
            .await?;
        // Row policies turn a forbidden delete into an empty result.
        let deleted: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ApiClientError::DecodeError(e.to_string()))?;
        if deleted.is_empty() {
            return Err(ApiClientError::NotFound(format!("media {}", media_id)));
        }
        Ok(())
    }

    async fn list_likes(&self, media_ids: &[String]) -> Result<Vec<LikeRow>, ApiClientError> {
        if media_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.get_rows(
            LIKES_TABLE,
            &[
                ("select", "media_id,user_id".to_string()),
                ("media_id", in_list(media_ids)),
            ],
        )
        .await
    }

    async fn insert_like(&self, media_id: &str, user_id: &str) -> Result<(), ApiClientError> {
        let row = LikeRow {
            media_id: media_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.send(self.client.post(self.rest(LIKES_TABLE)).json(&row))
            .await?;
        Ok(())
    }

    async fn delete_like(&self, media_id: &str, user_id: &str) -> Result<(), ApiClientError> {
        self.send(self.client.delete(self.rest(LIKES_TABLE)).query(&[
            ("media_id", format!("eq.{}", media_id)),
            ("user_id", format!("eq.{}", user_id)),
        ]))
        .await?;
        Ok(())
    }

    async fn participant_display_name(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, ApiClientError> {
        let rows: Vec<NameRow> = self
            .get_rows(
                PARTICIPANTS_TABLE,
                &[
                    ("select", "display_name".to_string()),
                    ("event_id", format!("eq.{}", event_id)),
                    ("user_id", format!("eq.{}", user_id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|r| r.display_name))
    }

    async fn profile_display_name(&self, user_id: &str) -> Result<Option<String>, ApiClientError> {
        let rows: Vec<NameRow> = self
            .get_rows(
                PROFILES_TABLE,
                &[
                    ("select", "display_name".to_string()),
                    ("id", format!("eq.{}", user_id)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|r| r.display_name))
    }

    async fn lookup_display_name(&self, user_id: &str) -> Result<Option<String>, ApiClientError> {
        let url = format!("{}/rest/v1/rpc/get_user_display_name", self.base_url);
        let response = self
            .send(self.client.post(url).json(&json!({ "user_id": user_id })))
            .await?;
        response
            .json::<Option<String>>()
            .await
            .map_err(|e| ApiClientError::DecodeError(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for ApiClient {
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self, payload)))]
    async fn upload(
        &self,
        path: &str,
        payload: &TransferPayload,
        upsert: bool,
    ) -> Result<(), ApiClientError> {
        let bytes = payload.decode()?;
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        self.send(
            self.client
                .post(url)
                .header(CONTENT_TYPE, payload.content_type.as_str())
                .header("x-upsert", if upsert { "true" } else { "false" })
                .body(bytes),
        )
        .await?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        public_object_url(&self.base_url, &self.bucket, path)
    }

    async fn remove(&self, paths: &[String]) -> Result<(), ApiClientError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        self.send(self.client.delete(url).json(&json!({ "prefixes": paths })))
            .await?;
        Ok(())
    }

    fn path_from_public_url(&self, url: &str) -> Option<String> {
        storage_path_from_url(url, &self.bucket)
    }
}

#[async_trait]
impl ChangeFeed for ApiClient {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription, ApiClientError> {
        let mut query = vec![("table", filter.table.clone())];
        if let Some(expr) = filter.expression() {
            query.push(("filter", expr));
        }
        let url = format!("{}/realtime/v1/sse", self.base_url);
        let response = self
            .send(
                self.client
                    .get(url)
                    .header(ACCEPT, "text/event-stream")
                    .query(&query),
            )
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let table = filter.table.clone();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        tracing::debug!(table = %table, "Change feed unsubscribed");
                        break;
                    }
                    chunk = stream.next() => {
                        let Some(chunk) = chunk else {
                            tracing::info!(table = %table, "Change feed stream closed");
                            break;
                        };
                        let chunk = match chunk {
                            Ok(c) => c,
                            Err(e) => {
                                tracing::warn!(
                                    table = %table,
                                    error = %e,
                                    "Change feed read failed"
                                );
                                break;
                            }
                        };
                        for data in decoder.push(&chunk) {
                            match serde_json::from_str::<ChangeEvent>(&data) {
                                Ok(ev) => {
                                    if tx.send(ev).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::debug!(error = %e, "Ignoring malformed change event")
                                }
                            }
                        }
                    }
                }
            }
        });
        Ok(Subscription::new(rx, cancel_tx))
    }
}
