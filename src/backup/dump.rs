use std::path::{Path, PathBuf};
use std::process::Command;

use which::which;

use crate::config::ConnectionConfig;
use crate::errors::{BackupError, Result};

/// Environment variable mysqldump reads the password from. Keeping the
/// password out of the argument vector keeps it out of process listings.
const PASSWORD_ENV: &str = "MYSQL_PWD";

/// A fully assembled dump-tool invocation: resolved executable, argument
/// vector, and the password handed over via the child environment. No shell
/// is involved at any point.
#[derive(Debug)]
pub struct DumpCommand {
    program: PathBuf,
    args: Vec<String>,
    password: String,
}

impl DumpCommand {
    /// Builds the invocation for the given connection. Requires an already
    /// validated [`ConnectionConfig`], so missing credentials have been
    /// reported before any process work starts.
    pub fn new(conn: &ConnectionConfig, dump_bin: &Path) -> Result<Self> {
        let program = find_dump_executable(dump_bin)?;

        let args = vec![
            format!("--host={}", conn.host),
            format!("--port={}", conn.port),
            format!("--user={}", conn.user),
            "--single-transaction".to_string(),
            "--routines".to_string(),
            "--triggers".to_string(),
            conn.database.clone(),
        ];

        Ok(Self {
            program,
            args,
            password: conn.password.clone(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The ready-to-spawn process. The dump is written to the child's
    /// stdout, which the caller captures.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env(PASSWORD_ENV, &self.password);
        cmd
    }
}

fn find_dump_executable(bin: &Path) -> Result<PathBuf> {
    which(bin).map_err(|_| {
        BackupError::Dump(format!(
            "dump executable '{}' not found in PATH; install the MySQL client tools or set MYSQLDUMP_PATH",
            bin.display()
        ))
    })
}
