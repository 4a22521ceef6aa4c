use crate::job::{JobState, UploadJob};
use crate::standardize::standardize;
use crate::UploadError;
use api_client::{NewMediaRow, ObjectStore, TransferPayload};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use sync::MediaRepository;
use tokio::sync::mpsc;

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 2;
const CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UploadProgress {
    /// A job moved to `state`.
    Job { index: usize, state: JobState },
    /// Emitted each time a job reaches a terminal state.
    Batch { succeeded: usize, failed: usize, total: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs in the order the assets were given.
    pub jobs: Vec<UploadJob>,
}

impl UploadSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub struct UploadPipeline {
    repository: Arc<MediaRepository>,
    objects: Arc<dyn ObjectStore>,
    concurrency: usize,
}

fn report(progress: &Option<mpsc::UnboundedSender<UploadProgress>>, update: UploadProgress) {
    if let Some(tx) = progress {
        if let Err(e) = tx.send(update) {
            tracing::debug!(error = ?e, "Upload progress receiver dropped");
        }
    }
}

impl UploadPipeline {
    pub fn new(repository: Arc<MediaRepository>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            repository,
            objects,
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload `assets` into `event_id` as the signed-in user.
    ///
    /// Jobs run independently; a failing asset is counted and the rest
    /// continue. Nothing is inserted into the local list directly: when at
    /// least one asset lands the repository is reloaded.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self, assets, progress)))]
    pub async fn upload(
        &self,
        event_id: &str,
        assets: Vec<PathBuf>,
        progress: Option<mpsc::UnboundedSender<UploadProgress>>,
    ) -> Result<UploadSummary, UploadError> {
        let user_id = self
            .repository
            .current_principal_id()
            .ok_or(UploadError::NotSignedIn)?;
        let start = Instant::now();
        let total = assets.len();
        let stamp = Utc::now().timestamp_millis();
        tracing::info!(event_id, total, "Starting upload batch");

        let jobs: Vec<UploadJob> = assets
            .into_iter()
            .enumerate()
            .map(|(index, path)| {
                let target = format!("{}/{}_{}_{}.jpg", event_id, user_id, stamp, index);
                UploadJob::new(index, path, target)
            })
            .collect();

        let mut succeeded = 0;
        let mut failed = 0;
        let mut finished: Vec<UploadJob> = Vec::with_capacity(total);
        let user = user_id.as_str();
        let updates = &progress;
        let mut runs = stream::iter(jobs)
            .map(move |job| self.run_job(job, event_id, user, updates))
            .buffer_unordered(self.concurrency);
        while let Some(job) = runs.next().await {
            if job.state == JobState::Done {
                succeeded += 1;
            } else {
                failed += 1;
            }
            report(&progress, UploadProgress::Batch { succeeded, failed, total });
            finished.push(job);
        }
        finished.sort_by_key(|j| j.index);

        tracing::info!(
            event_id,
            succeeded,
            failed,
            "upload_time_ms" = %start.elapsed().as_millis(),
            "Upload batch finished"
        );

        if succeeded > 0 {
            if let Err(e) = self.repository.reload(event_id).await {
                tracing::warn!(event_id, error = %e, "Reload after upload failed");
            }
        }

        Ok(UploadSummary {
            succeeded,
            failed,
            jobs: finished,
        })
    }

    async fn run_job(
        &self,
        mut job: UploadJob,
        event_id: &str,
        user_id: &str,
        progress: &Option<mpsc::UnboundedSender<UploadProgress>>,
    ) -> UploadJob {
        if let Err(e) = self.drive(&mut job, event_id, user_id, progress).await {
            tracing::warn!(
                event_id,
                path = %job.local_path.display(),
                error = %e,
                "Upload failed"
            );
            job.fail(&e);
        }
        report(progress, UploadProgress::Job { index: job.index, state: job.state });
        job
    }

    async fn drive(
        &self,
        job: &mut UploadJob,
        event_id: &str,
        user_id: &str,
        progress: &Option<mpsc::UnboundedSender<UploadProgress>>,
    ) -> Result<(), UploadError> {
        let step = |job: &mut UploadJob, next: JobState| -> Result<(), UploadError> {
            job.advance(next)?;
            report(progress, UploadProgress::Job { index: job.index, state: next });
            Ok(())
        };

        step(job, JobState::Resizing)?;
        let raw = tokio::fs::read(&job.local_path)
            .await
            .map_err(|e| UploadError::ReadError(format!("{}: {}", job.local_path.display(), e)))?;
        let jpeg = standardize(&raw)?;
        let payload = TransferPayload::encode(&jpeg, CONTENT_TYPE);

        step(job, JobState::Uploading)?;
        self.objects.upload(&job.target_path, &payload, true).await?;
        let url = self.objects.public_url(&job.target_path);

        step(job, JobState::Inserting)?;
        let row = self
            .repository
            .insert_media(&NewMediaRow::photo(event_id, user_id, &url))
            .await?;
        job.media_id = Some(row.id);

        job.advance(JobState::Done)?;
        tracing::debug!(event_id, target = %job.target_path, "Upload done");
        Ok(())
    }
}
