//! Inline image loading that walks the URL ladder, used when the cache is
//! bypassed.

use crate::fetcher::ImageFetcher;
use crate::url_ladder::url_variants;
use crate::CachedImage;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOutcome {
    Loaded { url: String, image: CachedImage },
    /// Every variant failed; the caller shows a retry control.
    Exhausted { tried: Vec<String> },
}

#[derive(Clone)]
pub struct FallbackLoader {
    fetcher: Arc<dyn ImageFetcher>,
}

impl FallbackLoader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Try each ladder variant in order: probe, then fetch the first one
    /// that answers. Unreachable variants are skipped.
    pub async fn load(&self, raw_url: &str) -> FallbackOutcome {
        let mut tried = Vec::new();
        for candidate in url_variants(raw_url) {
            if !self.fetcher.probe(&candidate).await {
                tracing::debug!(url = %candidate, "Variant unreachable");
                tried.push(candidate);
                continue;
            }
            match self.fetcher.fetch(&candidate).await {
                Ok(image) => {
                    return FallbackOutcome::Loaded {
                        url: candidate,
                        image,
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %candidate, error = %e, "Variant fetch failed");
                    tried.push(candidate);
                }
            }
        }
        tracing::warn!(url = raw_url, attempts = tried.len(), "All image URL variants failed");
        FallbackOutcome::Exhausted { tried }
    }
}
