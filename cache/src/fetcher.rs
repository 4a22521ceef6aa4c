//! Binary image download over HTTP.

use crate::{CachedImage, ImageCacheError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_DOWNLOADS: usize = 4;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<CachedImage, ImageCacheError>;
    /// Cheap reachability check. Must fail closed: any error or timeout is `false`.
    async fn probe(&self, url: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    probe_timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl HttpFetcher {
    pub fn new(probe_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(client, probe_timeout)
    }

    pub fn with_client(client: reqwest::Client, probe_timeout: Duration) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_DOWNLOADS)),
            probe_timeout,
        }
    }
}

fn map_error(e: reqwest::Error) -> ImageCacheError {
    if e.is_timeout() {
        ImageCacheError::Timeout
    } else {
        ImageCacheError::Network(e.to_string())
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<CachedImage, ImageCacheError> {
        let start = Instant::now();
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ImageCacheError::SemaphoreClosed)?;
        let response = self.client.get(url).send().await.map_err(map_error)?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ImageCacheError::NotFound),
            s => return Err(ImageCacheError::Http(s.as_u16())),
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await.map_err(map_error)?;
        tracing::debug!(
            "image_fetch_time_ms" = %start.elapsed().as_millis(),
            "bytes" = bytes.len()
        );
        Ok(CachedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    async fn probe(&self, url: &str) -> bool {
        let request = self.client.head(url).send();
        match tokio::time::timeout(self.probe_timeout, request).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url, "Probe timed out");
                false
            }
        }
    }
}
