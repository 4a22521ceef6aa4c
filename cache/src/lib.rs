//! Image cache module for the event gallery.

mod fallback;
mod fetcher;
mod image_cache;
pub mod url_ladder;

pub use fallback::{FallbackLoader, FallbackOutcome};
pub use fetcher::{HttpFetcher, ImageFetcher, DEFAULT_PROBE_TIMEOUT};
pub use image_cache::{CacheLookup, ImageCache, ImageEvent};

use base64::Engine;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ImageCacheError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("image not found")]
    NotFound,
    #[error("http status {0}")]
    Http(u16),
    #[error("semaphore closed")]
    SemaphoreClosed,
}

/// A downloaded image held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl CachedImage {
    /// Inline `data:` URI for renderers that take base64 sources.
    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri() {
        let img = CachedImage {
            bytes: b"hi".to_vec(),
            content_type: "image/png".into(),
        };
        assert_eq!(img.data_uri(), "data:image/png;base64,aGk=");
    }
}
