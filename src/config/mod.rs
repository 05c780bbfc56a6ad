use std::env;
use std::path::PathBuf;

use crate::errors::{BackupError, Result};

pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_DUMP_BIN: &str = "mysqldump";
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 3306;
const DEFAULT_HTTP_PORT: u16 = 8080;

/// Snapshot of the process environment, taken once at startup.
///
/// The connection fields stay optional here on purpose: the server must be
/// able to start without database credentials. They are enforced per
/// operation by [`BackupSettings::connection`], so only an actual backup
/// attempt fails when they are absent.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub backup_dir: PathBuf,
    pub dump_bin: PathBuf,
    pub http_port: u16,
    pub compress: bool,
    pub retention_days: Option<u32>,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
}

/// Validated connection parameters for the dump command builder.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl BackupSettings {
    pub fn from_env() -> Self {
        Self {
            backup_dir: env_opt("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            dump_bin: env_opt("MYSQLDUMP_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMP_BIN)),
            http_port: env_opt("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HTTP_PORT),
            compress: env_opt("BACKUP_COMPRESS")
                .map(|v| parse_truthy(&v))
                .unwrap_or(false),
            retention_days: env_opt("BACKUP_RETENTION_DAYS").and_then(|v| parse_retention(&v)),
            db_host: env_opt("DB_HOST").unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
            db_port: env_opt("DB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DB_PORT),
            db_user: env_opt("DB_USER"),
            db_password: env_opt("DB_PASSWORD"),
            db_name: env_opt("DB_NAME"),
        }
    }

    /// Checks the required connection fields and hands out a validated
    /// [`ConnectionConfig`]. Fails with every missing variable named, so the
    /// operator fixes the environment in one go.
    pub fn connection(&self) -> Result<ConnectionConfig> {
        match (&self.db_user, &self.db_password, &self.db_name) {
            (Some(user), Some(password), Some(database)) => Ok(ConnectionConfig {
                host: self.db_host.clone(),
                port: self.db_port,
                user: user.clone(),
                password: password.clone(),
                database: database.clone(),
            }),
            _ => {
                let mut missing = Vec::new();
                if self.db_user.is_none() {
                    missing.push("DB_USER");
                }
                if self.db_password.is_none() {
                    missing.push("DB_PASSWORD");
                }
                if self.db_name.is_none() {
                    missing.push("DB_NAME");
                }
                Err(BackupError::Config(format!(
                    "missing required database settings: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// Reads an environment variable, treating an empty value as unset.
fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Zero or unparsable means retention is disabled.
fn parse_retention(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok().filter(|days| *days > 0)
}
