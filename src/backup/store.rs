use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{BackupError, Result};

/// File suffixes recognized as backup artifacts. Anything else in the
/// directory is invisible to the store.
pub const BACKUP_EXTENSIONS: [&str; 3] = [".sql", ".sql.gz", ".zip"];

/// One backup artifact, described from filesystem metadata at query time.
/// The directory listing is the source of truth; nothing is cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDescriptor {
    pub filename: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// All filesystem access for backup artifacts goes through this type. It is
/// the sole enforcer of the directory boundary: any caller-supplied filename
/// passes [`BackupStore::resolve`] before it touches disk.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the backup directory, parents included. Idempotent.
    pub fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Enumerates artifacts, newest first. A missing directory or one with
    /// no matching entries yields an empty list, never an error.
    pub fn list(&self) -> Result<Vec<BackupDescriptor>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            if !is_backup_filename(&filename) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };

            backups.push(BackupDescriptor {
                filename,
                size: metadata.len(),
                created_at: DateTime::<Utc>::from(modified),
            });
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Validates an untrusted filename and returns its absolute path inside
    /// the backup directory.
    ///
    /// The traversal check compares canonicalized absolute paths rather than
    /// matching on the raw input, so `..` segments cannot escape the root no
    /// matter how they were smuggled in. Names without a recognized backup
    /// suffix are rejected outright: the store only ever hands out artifacts.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        if !is_backup_filename(filename) {
            return Err(BackupError::InvalidFilename(filename.to_string()));
        }

        self.ensure_directory()?;
        let root = self.root.canonicalize()?;
        let candidate = root.join(filename);

        match candidate.canonicalize() {
            Ok(resolved) => {
                if !resolved.starts_with(&root) {
                    return Err(BackupError::InvalidFilename(filename.to_string()));
                }
                if !resolved.is_file() {
                    return Err(BackupError::NotFound(filename.to_string()));
                }
                Ok(resolved)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // The path never resolved against the filesystem; a lexical
                // look at the components tells traversal input apart from a
                // file that simply is not there.
                let lexical_escape = Path::new(filename)
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)));
                if lexical_escape {
                    Err(BackupError::InvalidFilename(filename.to_string()))
                } else {
                    Err(BackupError::NotFound(filename.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves and removes an artifact. A concurrent deletion between the
    /// resolve and the remove is treated as already done.
    pub fn delete(&self, filename: &str) -> Result<()> {
        let path = self.resolve(filename)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Validated absolute path for streaming an artifact out as a download.
    pub fn file_path(&self, filename: &str) -> Result<PathBuf> {
        self.resolve(filename)
    }

    /// Removes artifacts whose modification time is older than the cutoff.
    /// Returns the filenames that were removed.
    pub fn prune(&self, max_age_days: u32) -> Result<Vec<String>> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(max_age_days));

        let mut removed = Vec::new();
        for descriptor in self.list()? {
            if descriptor.created_at >= cutoff {
                continue;
            }
            match fs::remove_file(self.root.join(&descriptor.filename)) {
                Ok(()) => removed.push(descriptor.filename),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

fn is_backup_filename(name: &str) -> bool {
    BACKUP_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}
