//! Command line client for event photo galleries.

use api_client::ApiClient;
use auth::{Principal, Session, SessionManager, USE_FILE_STORE_ENV};
use cache::HttpFetcher;
use clap::{Parser, Subcommand};
use gallery::{
    GalleryBackend, GallerySession, Projection, SelectionSet, SessionOptions, SortBy, ViewState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sync::{FeedConfig, MediaItem};
use tokio::sync::mpsc;
use tracing_appender::rolling;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use upload::UploadProgress;

mod config;

#[derive(Parser)]
#[command(name = "picz_gallery", author, version, about = "Event photo gallery client")]
struct Cli {
    /// Override log level (e.g. info, debug)
    #[arg(long)]
    log_level: Option<String>,
    /// Override the backend base URL
    #[arg(long)]
    api_url: Option<String>,
    /// Override the backend API key
    #[arg(long)]
    api_key: Option<String>,
    /// Override the storage bucket holding photos
    #[arg(long)]
    storage_bucket: Option<String>,
    /// Override the number of parallel uploads
    #[arg(long)]
    upload_concurrency: Option<usize>,
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Store the session in ~/.picz_gallery/session.json instead of the system keyring
    #[arg(long)]
    use_file_store: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a session obtained from the sign-in service
    Login {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// List the photos of an event
    List {
        #[arg(long)]
        event: String,
        /// newest, oldest, most-likes or by-user
        #[arg(long, default_value = "newest")]
        sort: SortBy,
        /// Only show photos uploaded by the signed-in user
        #[arg(long)]
        only_mine: bool,
        /// Print the projection as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload photos to an event
    Upload {
        #[arg(long)]
        event: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Like a photo, or remove your like
    Like {
        #[arg(long)]
        event: String,
        id: String,
    },
    /// Delete one or more photos
    Delete {
        #[arg(long)]
        event: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Follow an event and print changes until interrupted
    Watch {
        #[arg(long)]
        event: String,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn print_item(item: &MediaItem) {
    println!(
        "{}  {}  {} like(s){}  {}",
        item.id,
        item.display_name,
        item.likes_count,
        if item.user_has_liked { " (you)" } else { "" },
        item.created_at.to_rfc3339()
    );
}

fn print_projection(projection: &Projection) {
    match projection {
        Projection::Flat(items) => items.iter().for_each(print_item),
        Projection::Grouped(groups) => {
            for group in groups {
                println!("== {} ({}) ==", group.display_name, group.items.len());
                group.items.iter().for_each(print_item);
            }
        }
    }
}

async fn open_session(
    cfg: &config::AppConfig,
    event: &str,
    live: bool,
) -> Result<GallerySession, Box<dyn std::error::Error>> {
    let sessions = Arc::new(SessionManager::restore()?);
    let token = sessions
        .access_token()
        .map_err(|_| "Not signed in. Run `picz_gallery login` first.")?;

    let mut client = ApiClient::new(cfg.api_url.clone(), cfg.api_key.clone())
        .with_bucket(&cfg.storage_bucket);
    client.set_access_token(token);

    let options = SessionOptions {
        feed: FeedConfig {
            debounce: Duration::from_millis(cfg.feed_debounce_ms),
            ..Default::default()
        },
        live,
        upload_concurrency: cfg.upload_concurrency,
        image_cache_capacity: cfg.image_cache_capacity(),
    };
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(cfg.probe_timeout_secs)));
    let session = GallerySession::open(
        GalleryBackend::from_shared(Arc::new(client)),
        sessions,
        fetcher,
        event,
        options,
    )
    .await?;
    Ok(session)
}

#[cfg_attr(feature = "trace-spans", tracing::instrument)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.use_file_store {
        std::env::set_var(USE_FILE_STORE_ENV, "1");
    }

    let overrides = config::AppConfigOverrides {
        log_level: cli.log_level.clone(),
        api_url: cli.api_url.clone(),
        api_key: cli.api_key.clone(),
        storage_bucket: cli.storage_bucket.clone(),
        upload_concurrency: cli.upload_concurrency,
        feed_debounce_ms: None,
    };
    let cfg = config::AppConfig::load_from(cli.config.clone()).apply_overrides(&overrides);
    let base_dir = cfg.cache_path.clone();
    std::fs::create_dir_all(&base_dir)?;
    let file_appender = rolling::daily(&base_dir, "picz_gallery.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cfg.log_level.clone()))
        .with_writer(std::io::stderr.and(file_writer))
        .init();

    match cli.command {
        Commands::ShowConfig => {
            print!("{}", toml::to_string(&cfg)?);
        }
        Commands::Login { user_id, token, email } => {
            let session = Session {
                principal: Principal::new(&user_id, email.as_deref()),
                access_token: token,
            };
            SessionManager::new().sign_in(session)?;
            println!("Signed in as {}", user_id);
        }
        Commands::Logout => {
            SessionManager::new().sign_out()?;
            println!("Signed out");
        }
        Commands::List {
            event,
            sort,
            only_mine,
            json,
        } => {
            let session = open_session(&cfg, &event, false).await?;
            session.set_view(ViewState {
                sort_by: sort,
                only_mine,
            });
            let projection = session.projection();
            if json {
                println!("{}", serde_json::to_string_pretty(&projection)?);
            } else {
                if let Some(ctx) = session.repository().event_context() {
                    println!("{} ({} photos)", ctx.name, projection.len());
                }
                print_projection(&projection);
            }
            session.close().await;
        }
        Commands::Upload { event, files } => {
            let session = open_session(&cfg, &event, false).await?;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let printer = tokio::spawn(async move {
                while let Some(p) = rx.recv().await {
                    if let UploadProgress::Batch { succeeded, failed, total } = p {
                        println!("{}/{} done ({} failed)", succeeded + failed, total, failed);
                    }
                }
            });
            let summary = session.upload(files, Some(tx)).await?;
            let _ = printer.await;
            for job in summary.jobs.iter().filter(|j| j.error.is_some()) {
                eprintln!(
                    "{}: {}",
                    job.local_path.display(),
                    job.error.as_deref().unwrap_or_default()
                );
            }
            println!("Uploaded {} of {}", summary.succeeded, summary.total());
            session.close().await;
        }
        Commands::Like { event, id } => {
            let session = open_session(&cfg, &event, false).await?;
            let item = session.mutations().toggle_like(&id).await?;
            let verb = if item.user_has_liked { "Liked" } else { "Unliked" };
            println!("{} {} ({} like(s))", verb, item.id, item.likes_count);
            session.close().await;
        }
        Commands::Delete { event, ids } => {
            let session = open_session(&cfg, &event, false).await?;
            if let [id] = ids.as_slice() {
                let report = session.mutations().delete(id).await?;
                if let Some(err) = &report.blob_error {
                    eprintln!("Stored file was not removed: {}", err);
                }
                match &report.row_error {
                    None => println!("Deleted {}", id),
                    Some(err) => println!("Failed to delete {}: {}", id, err),
                }
            } else {
                let mut selection = SelectionSet::new();
                selection.enter();
                for id in &ids {
                    selection.toggle(id);
                }
                let report = session.mutations().bulk_delete(&mut selection).await;
                println!("Deleted {}", report);
            }
            session.close().await;
        }
        Commands::Watch { event } => {
            let mut session = open_session(&cfg, &event, true).await?;
            let mut state = session.subscribe();
            let mut errors = session.take_feed_errors();
            println!("Watching {} ({} photos)", event, session.projection().len());
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let count = state.borrow_and_update().items.len();
                        println!("{} photos", count);
                    }
                    Some(err) = async {
                        match errors.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        eprintln!("{}", err);
                    }
                }
            }
            session.close().await;
        }
    }

    Ok(())
}
