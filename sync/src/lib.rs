//! Keeps the gallery's view of one event in step with the backend.

use api_client::{ApiClientError, ErrorKind};
use thiserror::Error;

mod feed;
mod identity;
mod model;
mod repository;

pub use feed::{ChangeFeedListener, FeedConfig, FeedHandle};
pub use identity::{fallback_name, IdentityResolver};
pub use model::{EventContext, GalleryState, MediaItem};
pub use repository::MediaRepository;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("API Client Error: {0}")]
    ApiClientError(#[from] ApiClientError),
    #[error("Other Error: {0}")]
    Other(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ApiClientError(e) => e.kind(),
            SyncError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }
}

/// Errors raised by background tasks, forwarded to whoever is listening.
#[derive(Debug, Clone, Error)]
pub enum SyncTaskError {
    #[error("Reload failed: {0}")]
    ReloadFailed(String),
    #[error("Change feed disconnected: {0}")]
    FeedDisconnected(String),
    #[error("Other task error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_kind() {
        let err: SyncError = ApiClientError::Timeout.into();
        assert!(err.is_retryable());
        let err: SyncError = ApiClientError::NotFound("media".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(SyncError::Other("x".into()).kind(), ErrorKind::Other);
    }
}
