//! User-initiated likes and deletions.

use crate::notices::NoticeBus;
use crate::selection::SelectionSet;
use crate::MutationError;
use api_client::ObjectStore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use sync::{MediaItem, MediaRepository};

/// What happened to each step of a single delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub media_id: String,
    /// Storage path resolved from the public URL, if it could be.
    pub object_path: Option<String>,
    pub blob_error: Option<String>,
    pub row_error: Option<String>,
}

impl DeleteReport {
    /// The row is gone; a leftover blob does not make a delete fail.
    pub fn row_deleted(&self) -> bool {
        self.row_error.is_none()
    }

    pub fn blob_removed(&self) -> bool {
        self.object_path.is_some() && self.blob_error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} succeeded", self.succeeded, self.total())
    }
}

pub struct MutationCoordinator {
    repository: Arc<MediaRepository>,
    objects: Arc<dyn ObjectStore>,
    notices: NoticeBus,
}

fn flip_like(item: &mut MediaItem) {
    if item.user_has_liked {
        item.user_has_liked = false;
        item.likes_count = item.likes_count.saturating_sub(1);
    } else {
        item.user_has_liked = true;
        item.likes_count += 1;
    }
}

impl MutationCoordinator {
    pub fn new(
        repository: Arc<MediaRepository>,
        objects: Arc<dyn ObjectStore>,
        notices: NoticeBus,
    ) -> Self {
        Self {
            repository,
            objects,
            notices,
        }
    }

    fn principal_id(&self) -> Result<String, MutationError> {
        self.repository
            .current_principal_id()
            .ok_or(MutationError::NotSignedIn)
    }

    /// Flip the current user's like on `media_id`.
    ///
    /// The local item is patched before the remote write and patched back if
    /// the write fails. Returns the item as shown after the toggle.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn toggle_like(&self, media_id: &str) -> Result<MediaItem, MutationError> {
        let user_id = self.principal_id()?;
        let before = self
            .repository
            .patch_item(media_id, flip_like)
            .ok_or_else(|| MutationError::NotFound(media_id.to_string()))?;
        let liked = !before.user_has_liked;

        match self.repository.set_like(media_id, &user_id, liked).await {
            Ok(()) => {
                tracing::debug!(media_id, liked, "Like updated");
                let mut after = before;
                flip_like(&mut after);
                Ok(self.repository.item(media_id).unwrap_or(after))
            }
            Err(e) => {
                tracing::warn!(media_id, liked, error = %e, "Like update failed, reverting");
                // A reload may have landed meanwhile; only undo our own patch.
                self.repository.patch_item(media_id, |item| {
                    if item.user_has_liked == liked {
                        item.user_has_liked = before.user_has_liked;
                        item.likes_count = before.likes_count;
                    }
                });
                self.notices.error("Could not update like. Please try again.");
                Err(e.into())
            }
        }
    }

    /// The event creator may delete anything; everyone else only their own.
    pub fn can_delete(&self, item: &MediaItem) -> bool {
        let Some(principal) = self.repository.current_principal_id() else {
            return false;
        };
        if item.user_id == principal {
            return true;
        }
        self.repository
            .event_context()
            .map_or(false, |event| event.is_creator(&principal))
    }

    /// Delete one photo: blob first, then row. A blob failure is recorded and
    /// the row is still deleted. The item leaves the local list only when the
    /// row delete succeeds.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn delete(&self, media_id: &str) -> Result<DeleteReport, MutationError> {
        let item = self
            .repository
            .item(media_id)
            .ok_or_else(|| MutationError::NotFound(media_id.to_string()))?;
        if !self.can_delete(&item) {
            return Err(match self.repository.current_principal_id() {
                Some(_) => MutationError::Forbidden(media_id.to_string()),
                None => MutationError::NotSignedIn,
            });
        }

        let mut report = DeleteReport {
            media_id: media_id.to_string(),
            ..Default::default()
        };

        match self.objects.path_from_public_url(&item.url) {
            Some(path) => {
                if let Err(e) = self.objects.remove(std::slice::from_ref(&path)).await {
                    tracing::warn!(
                        media_id,
                        path = %path,
                        error = %e,
                        "Failed to remove stored object"
                    );
                    report.blob_error = Some(e.to_string());
                }
                report.object_path = Some(path);
            }
            None => {
                tracing::warn!(media_id, url = %item.url, "Cannot resolve storage path from url");
                report.blob_error = Some(format!("unrecognized storage url {}", item.url));
            }
        }

        match self.repository.delete_media(media_id).await {
            Ok(()) => {
                self.repository.remove_item(media_id);
                tracing::info!(media_id, blob_removed = report.blob_removed(), "Photo deleted");
            }
            Err(e) => {
                tracing::warn!(media_id, error = %e, "Failed to delete media row");
                report.row_error = Some(e.to_string());
            }
        }
        Ok(report)
    }

    /// Delete every selected photo, continuing past failures, then leave
    /// selection mode and reload.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self, selection)))]
    pub async fn bulk_delete(&self, selection: &mut SelectionSet) -> BatchReport {
        let ids: Vec<String> = selection.ids().to_vec();
        let mut report = BatchReport::default();
        for id in &ids {
            match self.delete(id).await {
                Ok(r) if r.row_deleted() => report.succeeded += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    tracing::warn!(media_id = %id, error = %e, "Skipping photo in bulk delete");
                    report.failed += 1;
                }
            }
        }
        selection.exit();

        if let Some(event) = self.repository.event_context() {
            if let Err(e) = self.repository.reload(&event.id).await {
                tracing::warn!(event_id = %event.id, error = %e, "Reload after bulk delete failed");
            }
        }

        if report.failed == 0 {
            self.notices.info(report.to_string());
        } else {
            self.notices.warn(report.to_string());
        }
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk delete finished"
        );
        report
    }
}
