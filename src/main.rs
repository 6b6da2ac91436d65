#![forbid(unsafe_code)]

mod config;
mod constants;
mod converter;
mod error;
mod ipc;
mod logging;
mod music;
mod paths;
mod persistence;
mod save_queue;
mod session;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info};

use constants::save;
use ipc::ManagerServer;
use logging::LogFile;
use paths::AppPaths;
use persistence::{DocumentStore, JsonFileStore};
use save_queue::SaveQueue;
use session::Session;

#[derive(Parser)]
#[command(name = "phos-music-manager", about = "Config and music data backend for the Phos music manager")]
struct Args {
    /// Application data directory
    #[arg(long)]
    root: Option<PathBuf>,

    /// IPC socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// trace, debug, info, warn or error (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Debounce window for queued saves
    #[arg(long, default_value_t = save::DELAY_MS)]
    save_delay_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    let log = logging::init(logging::parse_level(&level))?;

    let paths = AppPaths::new(args.root.unwrap_or_else(AppPaths::default_root));
    paths.create_all()?;
    info!(root = %paths.root().display(), "Using application directory");

    let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::new());
    let saves = SaveQueue::with_delay(store, Duration::from_millis(args.save_delay_ms))
        .with_auxiliary(Arc::new(LogFile::new(log.history().clone(), paths.app_log())));
    let session = Arc::new(Mutex::new(Session::load(paths, saves, Some(log))));

    let socket = match args.socket {
        Some(socket) => socket,
        None => ipc::default_socket_path()?,
    };
    let server = ManagerServer::bind_to(socket)?;
    let shutdown = Arc::new(Notify::new());

    tokio::select! {
        result = ipc::handler::serve(server, Arc::clone(&session), Arc::clone(&shutdown)) => {
            if let Err(e) = result {
                error!(error = ?e, "IPC listener crashed");
            }
        }
        _ = shutdown.notified() => info!("Shutting down"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        },
    }

    let report = session.lock().await.flush(true).await;
    info!(saved = report.saved, failed = report.failed, "Saved before exit");
    Ok(())
}
