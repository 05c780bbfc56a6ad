//! Database Backup Service
//!
//! Produces MySQL dumps on a daily schedule or on demand, and manages the
//! resulting artifacts over a small HTTP API.

mod api;
mod backup;
mod config;
mod errors;
mod scheduler;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use crate::api::AppState;
use crate::backup::BackupStore;
use crate::config::BackupSettings;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(BackupSettings::from_env());
    let store = BackupStore::new(settings.backup_dir.clone());
    store
        .ensure_directory()
        .with_context(|| format!("failed to create backup directory {}", settings.backup_dir.display()))?;
    info!(dir = %settings.backup_dir.display(), "backup store ready");

    let run_lock = Arc::new(Mutex::new(()));
    scheduler::spawn_daily_backup(settings.clone(), store.clone(), run_lock.clone());

    let app = api::router(AppState {
        settings: settings.clone(),
        store,
        run_lock,
    });

    let addr = format!("0.0.0.0:{}", settings.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "backup service listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
