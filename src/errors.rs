use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("dump execution failed: {0}")]
    Dump(String),

    #[error("invalid backup filename: {0}")]
    InvalidFilename(String),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
