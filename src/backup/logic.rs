use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{ChildStdout, Stdio};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};

use crate::backup::dump::DumpCommand;
use crate::backup::store::{BackupDescriptor, BackupStore};
use crate::config::BackupSettings;
use crate::errors::{BackupError, Result};

/// Produces one new backup artifact end to end: validate configuration,
/// derive a timestamped filename, run the dump tool with its stdout captured
/// into the destination file, then stat the result.
///
/// The subprocess runs inside `spawn_blocking`, so the async runtime stays
/// responsive for however long the dump takes. A failed run removes its
/// partial destination file before reporting the error.
pub async fn run_backup(
    settings: &BackupSettings,
    store: &BackupStore,
) -> Result<BackupDescriptor> {
    // Fails fast on missing credentials, before any process is spawned.
    let conn = settings.connection()?;
    let command = DumpCommand::new(&conn, &settings.dump_bin)?;

    store.ensure_directory()?;
    let filename = generate_filename(&conn.database, settings.compress);
    let destination = store.root().join(&filename);
    // The argument vector is safe to log: the password travels via the
    // child environment, never argv.
    debug!(
        filename = %filename,
        tool = %command.program().display(),
        args = ?command.args(),
        "starting database dump"
    );

    let compress = settings.compress;
    let (size, created_at) =
        tokio::task::spawn_blocking(move || execute_dump(command, &destination, compress))
            .await
            .map_err(|e| BackupError::Dump(format!("dump task failed to complete: {e}")))??;

    info!(filename = %filename, size, "database dump finished");
    Ok(BackupDescriptor {
        filename,
        size,
        created_at,
    })
}

/// `{database}_{YYYYMMDD}_{HHMMSS}.{ext}`, wall clock at invocation, UTC,
/// whole seconds.
fn generate_filename(database: &str, compress: bool) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let ext = if compress { "sql.gz" } else { "sql" };
    format!("{database}_{timestamp}.{ext}")
}

/// Runs the dump process to completion and returns size and modification
/// time of the destination file. Blocking; called via `spawn_blocking`.
fn execute_dump(
    command: DumpCommand,
    destination: &Path,
    compress: bool,
) -> Result<(u64, DateTime<Utc>)> {
    let mut child = command
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            BackupError::Dump(format!(
                "failed to spawn '{}': {e}",
                command.program().display()
            ))
        })?;

    let capture_result = match child.stdout.take() {
        Some(stdout) => capture_stdout(stdout, destination, compress),
        None => Err(io::Error::other("dump process has no stdout handle")),
    };

    // Drains the remaining pipes regardless of how the capture went, so the
    // child never blocks on a full stderr buffer.
    let output = child
        .wait_with_output()
        .map_err(|e| BackupError::Dump(format!("failed to wait for dump process: {e}")))?;
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if let Err(e) = capture_result {
        // An AlreadyExists here means the destination belongs to another
        // run; it must not be discarded.
        if e.kind() != io::ErrorKind::AlreadyExists {
            discard_partial(destination);
        }
        return Err(BackupError::Dump(with_diagnostics(
            format!("failed to capture dump output: {e}"),
            &stderr,
        )));
    }

    if !output.status.success() {
        discard_partial(destination);
        return Err(BackupError::Dump(with_diagnostics(
            format!("dump process exited with {}", output.status),
            &stderr,
        )));
    }

    // A zero exit with nothing written is still a failure: the artifact the
    // caller was promised does not exist.
    let metadata = match fs::metadata(destination) {
        Ok(metadata) => metadata,
        Err(e) => {
            return Err(BackupError::Dump(format!(
                "dump reported success but the destination file could not be read: {e}"
            )));
        }
    };
    if metadata.len() == 0 {
        discard_partial(destination);
        return Err(BackupError::Dump(
            "dump process succeeded but produced an empty file".to_string(),
        ));
    }

    let created_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok((metadata.len(), created_at))
}

/// Streams the child's stdout into the destination file, optionally through
/// a gzip encoder. `create_new` guards against clobbering a same-second
/// artifact from a concurrent run.
fn capture_stdout(stdout: ChildStdout, destination: &Path, compress: bool) -> io::Result<()> {
    let mut reader = BufReader::new(stdout);
    let file = File::create_new(destination)?;

    if compress {
        let mut encoder = GzEncoder::new(file, Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?;
    } else {
        let mut writer = BufWriter::new(file);
        io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
    }
    Ok(())
}

fn discard_partial(destination: &Path) {
    if let Err(e) = fs::remove_file(destination) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %destination.display(), error = %e, "could not remove partial dump file");
        }
    }
}

fn with_diagnostics(message: String, stderr: &str) -> String {
    if stderr.is_empty() {
        message
    } else {
        format!("{message}: {stderr}")
    }
}
