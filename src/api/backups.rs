use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::backup::{self, BackupDescriptor};
use crate::errors::BackupError;

use super::AppState;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct RunResponse {
    message: String,
    backup: BackupDescriptor,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/backups", get(list_backups))
        .route("/backups/run", post(run_backup))
        .route("/backups/{filename}/download", get(download_backup))
        .route("/backups/{filename}", delete(delete_backup))
}

async fn list_backups(
    State(state): State<AppState>,
) -> Result<Json<Vec<BackupDescriptor>>, ApiError> {
    state.store.list().map(Json).map_err(internal_error)
}

async fn run_backup(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let _guard = state.run_lock.lock().await;
    let backup = backup::run_backup(&state.settings, &state.store)
        .await
        .map_err(run_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RunResponse {
            message: "Backup created".to_string(),
            backup,
        }),
    ))
}

async fn download_backup(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.store.file_path(&filename).map_err(download_error)?;

    // The artifact can disappear between resolve and open; that race is an
    // ordinary not-found, see the store's concurrency rules.
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| download_error(BackupError::NotFound(filename.clone())))?;

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename.replace('"', "_")))
            .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid backup filename"))?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

async fn delete_backup(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.store.delete(&filename).map_err(delete_error)?;
    Ok(Json(MessageResponse {
        message: format!("Backup {filename} deleted"),
    }))
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

/// Unexpected failures keep their details in the log; the response body
/// stays generic so no internal paths leak out.
fn internal_error(err: BackupError) -> ApiError {
    error!(error = %err, "backup request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "backup operation failed")
}

fn run_error(err: BackupError) -> ApiError {
    match &err {
        BackupError::Config(_) | BackupError::Dump(_) => {
            error!(error = %err, "backup run failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        _ => internal_error(err),
    }
}

fn download_error(err: BackupError) -> ApiError {
    match err {
        BackupError::InvalidFilename(_) | BackupError::NotFound(_) => {
            api_error(StatusCode::NOT_FOUND, err.to_string())
        }
        other => internal_error(other),
    }
}

fn delete_error(err: BackupError) -> ApiError {
    match err {
        BackupError::InvalidFilename(_) | BackupError::NotFound(_) => {
            api_error(StatusCode::BAD_REQUEST, err.to_string())
        }
        other => internal_error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    use axum::body::to_bytes;
    use axum::http::Request;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use crate::backup::BackupStore;
    use crate::config::BackupSettings;

    fn test_state(dir: &std::path::Path) -> AppState {
        AppState {
            settings: Arc::new(BackupSettings {
                backup_dir: dir.to_path_buf(),
                // `echo` stands in for mysqldump in run tests.
                dump_bin: PathBuf::from("echo"),
                http_port: 0,
                compress: false,
                retention_days: None,
                db_host: "localhost".to_string(),
                db_port: 3306,
                db_user: Some("backup".to_string()),
                db_password: Some("secret".to_string()),
                db_name: Some("inventory".to_string()),
            }),
            store: BackupStore::new(dir.to_path_buf()),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn body_json(response: Response) -> anyhow::Result<serde_json::Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn list_returns_descriptors_newest_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("mydb_20250101_020000.sql"), vec![b'x'; 5000])?;
        sleep(Duration::from_millis(50));
        fs::write(dir.path().join("mydb_20250102_020000.sql"), vec![b'x'; 5200])?;
        fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let app = crate::api::router(test_state(dir.path()));
        let response = app
            .oneshot(Request::builder().uri("/backups").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let listed = body_json(response).await?;
        assert_eq!(listed[0]["filename"], "mydb_20250102_020000.sql");
        assert_eq!(listed[0]["size"], 5200);
        assert_eq!(listed[1]["filename"], "mydb_20250101_020000.sql");
        assert_eq!(listed[1]["size"], 5000);
        assert!(listed[0]["createdAt"].is_string());
        assert_eq!(listed.as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn run_creates_an_artifact_and_reports_it() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());

        let response = crate::api::router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/backups/run")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await?;
        let filename = body["backup"]["filename"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();
        assert!(filename.starts_with("inventory_"));
        assert!(filename.ends_with(".sql"));

        let listed = state.store.list()?;
        assert!(listed.iter().any(|d| d.filename == filename));
        Ok(())
    }

    #[tokio::test]
    async fn run_without_credentials_is_a_server_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut state = test_state(dir.path());
        let mut settings = (*state.settings).clone();
        settings.db_user = None;
        state.settings = Arc::new(settings);

        let response = crate::api::router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/backups/run")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await?;
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .contains("DB_USER")
        );
        Ok(())
    }

    #[tokio::test]
    async fn download_streams_with_attachment_header() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("mydb_20250101_020000.sql"), b"-- dump --")?;

        let response = crate::api::router(test_state(dir.path()))
            .oneshot(
                Request::builder()
                    .uri("/backups/mydb_20250101_020000.sql/download")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
            Some("attachment; filename=\"mydb_20250101_020000.sql\"")
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&bytes[..], b"-- dump --");
        Ok(())
    }

    #[tokio::test]
    async fn download_of_missing_backup_is_404() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = crate::api::router(test_state(dir.path()))
            .oneshot(
                Request::builder()
                    .uri("/backups/ghost_20250101_020000.sql/download")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn download_rejects_traversal_with_404() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("escape.sql"), b"outside")?;
        let root = dir.path().join("store");
        fs::create_dir_all(&root)?;

        let response = crate::api::router(test_state(&root))
            .oneshot(
                Request::builder()
                    // Encoded slash: decodes to ../escape.sql in the handler.
                    .uri("/backups/..%2Fescape.sql/download")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn delete_rejects_traversal_with_400() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("escape.sql"), b"outside")?;
        let root = dir.path().join("store");
        fs::create_dir_all(&root)?;

        let response = crate::api::router(test_state(&root))
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/backups/..%2Fescape.sql")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // The hostile target is untouched.
        assert!(dir.path().join("escape.sql").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn delete_twice_reports_the_second_as_gone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("mydb_20250101_020000.sql"), b"-- dump --")?;
        let state = test_state(dir.path());

        let request = || {
            Request::builder()
                .method("DELETE")
                .uri("/backups/mydb_20250101_020000.sql")
                .body(Body::empty())
        };

        let first = crate::api::router(state.clone()).oneshot(request()?).await?;
        assert_eq!(first.status(), StatusCode::OK);
        let body = body_json(first).await?;
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .contains("mydb_20250101_020000.sql")
        );

        let second = crate::api::router(state).oneshot(request()?).await?;
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
