//! Gallery-level behaviour on top of the synced media list: sorting and
//! filtering, likes and deletions, selection, notices, and the session that
//! wires them to one event.

use api_client::ErrorKind;
use sync::SyncError;
use thiserror::Error;

pub mod mutations;
pub mod notices;
pub mod selection;
mod session;
pub mod sort_filter;

pub use mutations::{BatchReport, DeleteReport, MutationCoordinator};
pub use notices::{Notice, NoticeBus, NoticeLevel};
pub use selection::SelectionSet;
pub use session::{GalleryBackend, GallerySession, SessionOptions};
pub use sort_filter::{project, Projection, SortBy, UserGroup, ViewState};

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Media not found: {0}")]
    NotFound(String),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Not allowed to delete {0}")]
    Forbidden(String),
    #[error("Sync Error: {0}")]
    SyncError(#[from] SyncError),
}

impl MutationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MutationError::NotFound(_) => ErrorKind::NotFound,
            MutationError::NotSignedIn | MutationError::Forbidden(_) => ErrorKind::Permission,
            MutationError::SyncError(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }
}
