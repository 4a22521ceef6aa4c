//! Batch photo uploads: standardize, store the object, insert the row.

use api_client::{ApiClientError, ErrorKind};
use sync::SyncError;
use thiserror::Error;

mod job;
mod pipeline;
mod standardize;

pub use job::{JobState, UploadJob};
pub use pipeline::{UploadPipeline, UploadProgress, UploadSummary, DEFAULT_UPLOAD_CONCURRENCY};
pub use standardize::{standardize, JPEG_QUALITY, MAX_DIMENSION};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Read Error: {0}")]
    ReadError(String),
    #[error("Image Error: {0}")]
    ImageError(String),
    #[error("API Client Error: {0}")]
    ApiClientError(#[from] ApiClientError),
    #[error("Sync Error: {0}")]
    SyncError(#[from] SyncError),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Illegal upload state transition {from:?} -> {to:?}")]
    IllegalTransition { from: JobState, to: JobState },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::ApiClientError(e) => e.kind(),
            UploadError::SyncError(e) => e.kind(),
            UploadError::NotSignedIn => ErrorKind::Permission,
            _ => ErrorKind::Other,
        }
    }
}
