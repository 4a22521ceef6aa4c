use api_client::{ObjectStore, RowStore};
use auth::{Principal, StaticIdentity};
use image::{DynamicImage, ImageFormat, RgbImage};
use mocks::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync::MediaRepository;
use tempfile::TempDir;
use tokio::sync::mpsc;
use upload::{JobState, UploadError, UploadPipeline, UploadProgress};

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .save_with_format(&path, ImageFormat::Png)
        .unwrap();
    path
}

fn setup(signed_in: bool) -> (Arc<InMemoryBackend>, Arc<MediaRepository>, UploadPipeline) {
    let backend = Arc::new(InMemoryBackend::new());
    backend.add_event("e1", "Picnic", "owner", None);
    let principal = signed_in.then(|| Principal::new("u1", Some("dana@example.com")));
    let store: Arc<dyn RowStore> = backend.clone();
    let repo = Arc::new(MediaRepository::new(store, Arc::new(StaticIdentity(principal))));
    let objects: Arc<dyn ObjectStore> = backend.clone();
    let pipeline = UploadPipeline::new(repo.clone(), objects);
    (backend, repo, pipeline)
}

#[tokio::test]
async fn test_batch_with_unreadable_asset() {
    let (backend, repo, pipeline) = setup(true);
    let dir = TempDir::new().unwrap();
    let mut assets = Vec::new();
    for i in 0..5 {
        let name = format!("p{}.png", i);
        if i == 2 {
            let path = dir.path().join(&name);
            std::fs::write(&path, b"not an image").unwrap();
            assets.push(path);
        } else {
            assets.push(write_png(dir.path(), &name, 64, 48));
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = pipeline.upload("e1", assets, Some(tx)).await.unwrap();
    assert_eq!((summary.succeeded, summary.failed), (4, 1));
    assert_eq!(summary.total(), 5);
    assert_eq!(summary.jobs[2].state, JobState::Failed);
    assert!(summary.jobs[2].error.is_some());
    assert!(summary
        .jobs
        .iter()
        .filter(|j| j.index != 2)
        .all(|j| j.state == JobState::Done && j.media_id.is_some()));

    assert_eq!(backend.media_rows("e1").len(), 4);
    let items = repo.items();
    assert_eq!(items.len(), 4, "reload after upload shows new rows");
    assert!(items.iter().all(|i| i.user_id == "u1" && i.display_name == "dana"));

    let mut last_batch = None;
    let mut job_updates = 0;
    while let Ok(update) = rx.try_recv() {
        match update {
            UploadProgress::Batch { .. } => last_batch = Some(update),
            UploadProgress::Job { .. } => job_updates += 1,
        }
    }
    assert_eq!(
        last_batch,
        Some(UploadProgress::Batch { succeeded: 4, failed: 1, total: 5 })
    );
    // 4 jobs go Resizing, Uploading, Inserting, Done; the failed one Resizing, Failed.
    assert_eq!(job_updates, 4 * 4 + 2);
}

#[tokio::test]
async fn test_objects_are_standardized_and_named() {
    let (backend, _repo, pipeline) = setup(true);
    let dir = TempDir::new().unwrap();
    let asset = write_png(dir.path(), "wide.png", 2160, 1080);

    let summary = pipeline.upload("e1", vec![asset], None).await.unwrap();
    let job = &summary.jobs[0];
    assert!(job.target_path.starts_with("e1/u1_"));
    assert!(job.target_path.ends_with("_0.jpg"));

    let stored = backend.object(&job.target_path).expect("object stored");
    assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Jpeg);
    let img = image::load_from_memory(&stored).unwrap();
    assert_eq!((img.width(), img.height()), (1080, 540));

    let rows = backend.media_rows("e1");
    assert_eq!(rows[0].url, backend.public_url(&job.target_path));
    assert_eq!(rows[0].kind, "photo");
}

#[tokio::test]
async fn test_storage_failure_fails_every_job_without_reload() {
    let (backend, repo, pipeline) = setup(true);
    backend.fail(|f| f.upload = true);
    let dir = TempDir::new().unwrap();
    let assets = vec![
        write_png(dir.path(), "a.png", 10, 10),
        write_png(dir.path(), "b.png", 10, 10),
    ];

    let summary = pipeline.upload("e1", assets, None).await.unwrap();
    assert_eq!((summary.succeeded, summary.failed), (0, 2));
    assert_eq!(backend.calls("list_media"), 0);
    assert!(repo.items().is_empty());
}

#[tokio::test]
async fn test_row_insert_failure_counts_as_failed() {
    let (backend, _repo, pipeline) = setup(true);
    backend.fail(|f| f.insert_media = true);
    let dir = TempDir::new().unwrap();
    let summary = pipeline
        .upload("e1", vec![write_png(dir.path(), "a.png", 10, 10)], None)
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert!(backend.has_object(&summary.jobs[0].target_path));
}

#[tokio::test]
async fn test_requires_sign_in() {
    let (_backend, _repo, pipeline) = setup(false);
    let err = pipeline.upload("e1", Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, UploadError::NotSignedIn));
}
