//! Source adapters
//!
//! An adapter knows how to produce a backup artifact from one kind of live
//! source and how to put an artifact back. The orchestrator picks one per
//! request through [`SourceAdapter::supports`] and, for database adapters,
//! the connection each one is bound to.

pub mod filesystem;
pub mod mysql;
pub mod postgres;
pub mod sqlserver;

pub use self::filesystem::FilesystemAdapter;
pub use self::mysql::MySqlAdapter;
pub use self::postgres::PostgresAdapter;
pub use self::sqlserver::SqlServerAdapter;

use crate::models::{BackupOutcome, BackupRequest, RestoreOptions};
use crate::utils::fs::remove_path;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, warn};
use walkdir::WalkDir;

/// Database engine behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabasePlatform {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "sqlserver")]
    SqlServer,
}

impl DatabasePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabasePlatform::MySql => "mysql",
            DatabasePlatform::Postgres => "postgres",
            DatabasePlatform::SqlServer => "sqlserver",
        }
    }

    /// External tools this platform's adapter shells out to
    pub fn tools(&self) -> &'static [&'static str] {
        match self {
            DatabasePlatform::MySql => &["mysqldump", "mysql"],
            DatabasePlatform::Postgres => &["pg_dump", "pg_restore", "psql"],
            DatabasePlatform::SqlServer => &["sqlcmd"],
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabasePlatform::MySql => 3306,
            DatabasePlatform::Postgres => 5432,
            DatabasePlatform::SqlServer => 1433,
        }
    }
}

impl fmt::Display for DatabasePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabasePlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabasePlatform::MySql),
            "postgres" | "postgresql" | "pgsql" => Ok(DatabasePlatform::Postgres),
            "sqlserver" | "mssql" | "sqlsrv" => Ok(DatabasePlatform::SqlServer),
            other => Err(format!("Unknown database platform: {}", other)),
        }
    }
}

/// Identity of the connection a database adapter is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub name: String,
    pub platform: DatabasePlatform,
}

/// Everything needed to reach a database server
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConnection {
    pub name: String,
    pub platform: DatabasePlatform,
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

impl DatabaseConnection {
    pub fn new(name: &str, platform: DatabasePlatform, database: &str) -> Self {
        Self {
            name: name.to_string(),
            platform,
            host: "localhost".to_string(),
            port: None,
            username: None,
            password: None,
            database: database.to_string(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.platform.default_port())
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            name: self.name.clone(),
            platform: self.platform,
        }
    }
}

// Keep passwords out of logs
impl fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

/// Backup/restore strategy for one source type
pub trait SourceAdapter: Send + Sync {
    /// Short adapter name used in logs and outcome metadata
    fn name(&self) -> &str;

    /// Whether this adapter handles the given type string
    fn supports(&self, backup_type: &str) -> bool;

    /// Problems with the request; empty means it can run
    fn validate(&self, request: &BackupRequest) -> Vec<String>;

    fn backup(&self, request: &BackupRequest) -> Result<BackupOutcome>;

    fn restore(&self, artifact: &Path, options: &RestoreOptions) -> Result<bool>;

    /// Adapters that talk to a live server return true
    fn requires_connection(&self) -> bool {
        false
    }

    fn connection(&self) -> Option<ConnectionHandle> {
        None
    }
}

/// Validation shared by every database adapter
pub(crate) fn validate_database_request(
    request: &BackupRequest,
    connection: &DatabaseConnection,
) -> Vec<String> {
    let mut errors = Vec::new();
    if request.output_dir().is_none() {
        errors.push("Output path is required".to_string());
    }
    if request.name.trim().is_empty() {
        errors.push("Backup name is required".to_string());
    }
    if connection.database.trim().is_empty() {
        errors.push(format!(
            "Connection '{}' has no database configured",
            connection.name
        ));
    }
    errors
}

/// Extra command-line flags from the request's escape-hatch map
///
/// Keys starting with `--` are forwarded as `--key=value`, or as a bare
/// `--key` when the value is empty. Anything else is ignored.
pub(crate) fn passthrough_flags(extra: &BTreeMap<String, String>) -> Vec<String> {
    extra
        .iter()
        .filter(|(key, _)| key.starts_with("--"))
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect()
}

/// Failed outcome for a dump tool error; removes the partial dump first
pub(crate) fn dump_failed(tool: &str, dump: &Path, err: &anyhow::Error) -> BackupOutcome {
    error!("{} failed: {:#}", tool, err);
    if let Err(cleanup) = remove_path(dump) {
        warn!("Failed to remove partial dump {}: {}", dump.display(), cleanup);
    }
    BackupOutcome::failed(format!("{} failed: {:#}", tool, err))
}

/// Find the dump file inside an artifact
///
/// Decompressed archives come back as directories; pick the first file
/// with one of `extensions`, falling back to the first file at all.
pub(crate) fn locate_dump(artifact: &Path, extensions: &[&str]) -> Result<PathBuf> {
    if artifact.is_file() {
        return Ok(artifact.to_path_buf());
    }
    if !artifact.is_dir() {
        anyhow::bail!("Backup artifact not found: {}", artifact.display());
    }

    let files: Vec<PathBuf> = WalkDir::new(artifact)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    files
        .iter()
        .find(|f| {
            f.extension()
                .map(|ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)))
                .unwrap_or(false)
        })
        .or_else(|| files.first())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No dump file found in {}", artifact.display()))
}
