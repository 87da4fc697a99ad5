use crate::adapters::DatabasePlatform;
use crate::models::BackupType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub storage: BTreeMap<String, StorageConfig>,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Root for `{base_dir}/{type}` output directories and the implicit
    /// `local` storage backend
    pub base_dir: PathBuf,

    /// Storage backend used when a request names none
    #[serde(default = "default_storage")]
    pub default_storage: String,

    /// Connection used to pick a database adapter when a request names none
    #[serde(default)]
    pub default_connection: Option<String>,

    /// Codec applied when a request names none (`zip` or `gzip`)
    #[serde(default)]
    pub default_compression: Option<String>,

    /// Timeout settings
    #[serde(default = "default_timeout")]
    pub command_timeout_seconds: u64,

    #[serde(default = "default_lock_directory")]
    pub lock_directory: PathBuf,

    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
}

/// Maximum backup age per type, in days
///
/// Zero or a negative number disables retention for that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_database_days")]
    pub database_days: i64,
    #[serde(default = "default_filesystem_days")]
    pub filesystem_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            database_days: default_database_days(),
            filesystem_days: default_filesystem_days(),
        }
    }
}

impl RetentionPolicy {
    pub fn days_for(&self, backup_type: BackupType) -> i64 {
        match backup_type {
            BackupType::Database => self.database_days,
            BackupType::Filesystem => self.filesystem_days,
            BackupType::Custom => 0,
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        path: PathBuf,
    },
    Rclone {
        /// rclone remote and path, e.g. `s3:bucket/backups`
        remote: String,
        #[serde(default)]
        config_file: Option<PathBuf>,
    },
}

/// Database connection configuration
#[derive(Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub platform: DatabasePlatform,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// File holding the password; its content is trimmed
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    pub database: String,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("platform", &self.platform)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_file", &self.password_file)
            .field("database", &self.database)
            .finish()
    }
}

/// Filesystem backup defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilesystemConfig {
    /// Paths backed up when a request names none
    #[serde(default)]
    pub default_paths: Vec<PathBuf>,

    /// Exclusion patterns applied to every filesystem backup
    #[serde(default)]
    pub default_excludes: Vec<String>,
}

/// Notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub webhook_url: String,

    #[serde(default = "default_notify_on")]
    pub notify_on: Vec<NotifyEvent>,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_minutes: u64,

    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            notify_on: default_notify_on(),
            rate_limit_minutes: default_rate_limit(),
            cache_file: default_cache_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    PreBackup,
    PostBackup,
    BackupFailed,
    PreRestore,
    PostRestore,
    RestoreFailed,
}

// Default value functions

fn default_storage() -> String { "local".to_string() }
fn default_timeout() -> u64 { 3600 }
fn default_lock_directory() -> PathBuf { PathBuf::from("/tmp/backup-orchestrator") }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_database_days() -> i64 { 30 }
fn default_filesystem_days() -> i64 { 14 }
fn default_host() -> String { "localhost".to_string() }
fn default_notify_on() -> Vec<NotifyEvent> {
    vec![NotifyEvent::BackupFailed, NotifyEvent::RestoreFailed]
}
fn default_rate_limit() -> u64 { 60 }
fn default_cache_file() -> PathBuf {
    PathBuf::from("~/.cache/backup-orchestrator-notifications.json")
}
