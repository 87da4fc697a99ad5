//! Backup requests, outcomes and the per-adapter option structs

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

/// Logical backup type a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Database,
    Filesystem,
    Custom,
}

impl BackupType {
    /// Types the retention sweep visits when no filter is given
    pub const RETAINED: [BackupType; 2] = [BackupType::Database, BackupType::Filesystem];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Database => "database",
            BackupType::Filesystem => "filesystem",
            BackupType::Custom => "custom",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "database" | "db" => Ok(BackupType::Database),
            "filesystem" | "files" => Ok(BackupType::Filesystem),
            "custom" => Ok(BackupType::Custom),
            other => Err(format!("Unknown backup type: {}", other)),
        }
    }
}

/// Options for `mysqldump`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlOptions {
    /// Consistent InnoDB snapshot without locking tables (default: true)
    pub single_transaction: bool,
    /// Include stored procedures and functions (default: true)
    pub routines: bool,
    /// Include triggers (default: true)
    pub triggers: bool,
    /// Emit `DROP TABLE` before each `CREATE TABLE` (default: true)
    pub add_drop_table: bool,
}

impl Default for MySqlOptions {
    fn default() -> Self {
        Self {
            single_transaction: true,
            routines: true,
            triggers: true,
            add_drop_table: true,
        }
    }
}

/// `pg_dump` output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostgresFormat {
    Plain,
    #[default]
    Custom,
    Tar,
}

impl PostgresFormat {
    pub fn flag(&self) -> &'static str {
        match self {
            PostgresFormat::Plain => "p",
            PostgresFormat::Custom => "c",
            PostgresFormat::Tar => "t",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PostgresFormat::Plain => "sql",
            PostgresFormat::Custom => "dump",
            PostgresFormat::Tar => "tar",
        }
    }
}

impl FromStr for PostgresFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "p" | "sql" => Ok(PostgresFormat::Plain),
            "custom" | "c" => Ok(PostgresFormat::Custom),
            "tar" | "t" => Ok(PostgresFormat::Tar),
            other => Err(format!("Unknown pg_dump format: {}", other)),
        }
    }
}

/// Options for `pg_dump` / `pg_restore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresOptions {
    /// Dump format (default: custom)
    pub format: PostgresFormat,
    /// Drop objects before recreating them on restore (default: true)
    pub clean: bool,
    /// Skip ownership statements (default: true)
    pub no_owner: bool,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            format: PostgresFormat::Custom,
            clean: true,
            no_owner: true,
        }
    }
}

/// Options for SQL Server `BACKUP DATABASE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlServerOptions {
    /// Do not disturb the differential base (default: true)
    pub copy_only: bool,
    /// Server-side backup compression (default: false, not every edition has it)
    pub compression: bool,
    /// Verify page checksums while writing (default: true)
    pub checksum: bool,
}

impl Default for SqlServerOptions {
    fn default() -> Self {
        Self {
            copy_only: true,
            compression: false,
            checksum: true,
        }
    }
}

/// Adapter-specific tuning carried by a request
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Filesystem roots to back up
    pub paths: Vec<PathBuf>,
    pub mysql: MySqlOptions,
    pub postgres: PostgresOptions,
    pub sqlserver: SqlServerOptions,
    /// Adapter-private extensions
    pub extra: BTreeMap<String, String>,
}

/// What to back up and where the result should go
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub backup_type: BackupType,
    pub name: String,
    /// Storage backend name; the orchestrator default when unset
    pub storage: Option<String>,
    /// Codec name (`zip`, `gzip`); no compression when unset
    pub compression: Option<String>,
    /// Output directory; `{base_dir}/{type}` when unset
    pub output_path: Option<PathBuf>,
    pub options: BackupOptions,
    /// Table names (databases) or path globs (filesystem)
    pub exclude: Vec<String>,
    /// Explicit source connection name
    pub connection: Option<String>,
}

impl BackupRequest {
    pub fn new(backup_type: BackupType, name: &str) -> Self {
        Self {
            backup_type,
            name: name.to_string(),
            storage: None,
            compression: None,
            output_path: None,
            options: BackupOptions::default(),
            exclude: Vec::new(),
            connection: None,
        }
    }

    pub fn with_storage(mut self, storage: &str) -> Self {
        self.storage = Some(storage.to_string());
        self
    }

    pub fn with_compression(mut self, codec: &str) -> Self {
        self.compression = Some(codec.to_string());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.paths.push(path.into());
        self
    }

    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.exclude.push(pattern.to_string());
        self
    }

    pub fn with_connection(mut self, connection: &str) -> Self {
        self.connection = Some(connection.to_string());
        self
    }

    /// Output directory once the orchestrator has filled in defaults
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

/// Result of one backup attempt
///
/// Adapters construct it; afterwards only the orchestrator amends it
/// (artifact rewritten after compression, duration backfilled).
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    success: bool,
    path: Option<PathBuf>,
    size: Option<u64>,
    created_at: DateTime<Utc>,
    duration_secs: Option<f64>,
    error: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl BackupOutcome {
    pub fn succeeded(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            success: true,
            path: Some(path.into()),
            size: Some(size),
            created_at: Utc::now(),
            duration_secs: None,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: None,
            size: None,
            created_at: Utc::now(),
            duration_secs: None,
            error: Some(error.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub(crate) fn replace_artifact(&mut self, path: PathBuf, size: u64) {
        self.path = Some(path);
        self.size = Some(size);
    }

    pub(crate) fn backfill_duration(&mut self, secs: f64) {
        if self.duration_secs.is_none() {
            self.duration_secs = Some(secs);
        }
    }

    pub(crate) fn insert_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// Options accepted by restore
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Connection override used during adapter resolution
    pub connection: Option<String>,
    /// Filesystem restore destination
    pub target: Option<PathBuf>,
    pub force: bool,
    /// Put the database in single-user mode for the restore (SQL Server)
    pub single_user: bool,
    /// Bring the database online after restore (default: true)
    pub recovery: bool,
    /// Take a safety copy of the current data before overwriting it
    pub backup_existing: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            connection: None,
            target: None,
            force: false,
            single_user: false,
            recovery: true,
            backup_existing: false,
        }
    }
}

/// Timestamp used in artifact names
pub fn artifact_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// `{name}_{timestamp}`, the stem every artifact file name starts with
pub fn artifact_stem(name: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", name, artifact_timestamp(at))
}

/// Recover the logical backup name from an artifact file name
pub fn artifact_name(file_name: &str) -> String {
    static STAMP: OnceLock<Option<Regex>> = OnceLock::new();
    let stamp = STAMP.get_or_init(|| {
        Regex::new(r"^(?P<name>.+?)_\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}(\..*)?$").ok()
    });

    if let Some(caps) = stamp.as_ref().and_then(|re| re.captures(file_name)) {
        return caps["name"].to_string();
    }

    file_name
        .split('.')
        .next()
        .unwrap_or(file_name)
        .to_string()
}

/// Catalog id for an artifact: UUID v5 over `{storage}:{key}`
///
/// Derived from where the artifact lives, so it is the same before and after
/// a process restart and the same whether the entry came from a backup run
/// or from a storage listing.
pub fn catalog_id(storage: &str, key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}:{}", storage, key).as_bytes()).to_string()
}
