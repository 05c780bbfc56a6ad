mod backups;

use std::sync::Arc;

use axum::Router;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::backup::BackupStore;
use crate::config::BackupSettings;

/// Shared handler state. Cloned per request; everything inside is cheap to
/// clone or reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<BackupSettings>,
    pub store: BackupStore,
    /// Single-slot guard shared with the scheduler: concurrent backup runs
    /// queue here instead of dumping the same database twice at once.
    pub run_lock: Arc<Mutex<()>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(backups::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
