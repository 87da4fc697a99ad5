//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with every
//! directory inside a temporary root.

use backup_orchestrator::adapters::DatabasePlatform;
use backup_orchestrator::config::{
    Config, ConnectionConfig, FilesystemConfig, GlobalConfig, NotificationConfig, RetentionPolicy,
    StorageConfig,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: GlobalConfig,
    retention: RetentionPolicy,
    storage: BTreeMap<String, StorageConfig>,
    connections: BTreeMap<String, ConnectionConfig>,
    filesystem: FilesystemConfig,
    notifications: NotificationConfig,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with only the implicit `local` storage
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let base_dir = temp_dir.path().join("backups");
        fs::create_dir_all(&base_dir).expect("Failed to create base_dir");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        let global = GlobalConfig {
            base_dir,
            default_storage: "local".to_string(),
            default_connection: None,
            default_compression: None,
            command_timeout_seconds: 60,
            lock_directory: temp_dir.path().join("locks"),
            log_directory,
            log_level: "debug".to_string(),
            log_max_files: 5,
        };

        let notifications = NotificationConfig {
            cache_file: temp_dir.path().join("notification-cache.json"),
            ..NotificationConfig::default()
        };

        Self {
            temp_dir,
            global,
            retention: RetentionPolicy::default(),
            storage: BTreeMap::new(),
            connections: BTreeMap::new(),
            filesystem: FilesystemConfig::default(),
            notifications,
        }
    }

    /// Minimal config plus a second local storage named `archive`
    pub fn with_archive_storage() -> Self {
        let builder = Self::new();
        let path = builder.temp_dir.path().join("archive");
        fs::create_dir_all(&path).expect("Failed to create archive dir");
        builder.add_local_storage("archive", &path)
    }

    /// Add a local storage backend
    pub fn add_local_storage(mut self, name: &str, path: &Path) -> Self {
        self.storage.insert(
            name.to_string(),
            StorageConfig::Local {
                path: path.to_path_buf(),
            },
        );
        self
    }

    /// Add a database connection with an inline password
    pub fn add_connection(mut self, name: &str, platform: DatabasePlatform, database: &str) -> Self {
        self.connections.insert(
            name.to_string(),
            ConnectionConfig {
                platform,
                host: "localhost".to_string(),
                port: None,
                username: Some("backup".to_string()),
                password: Some("secret".to_string()),
                password_file: None,
                database: database.to_string(),
            },
        );
        self
    }

    pub fn with_default_storage(mut self, name: &str) -> Self {
        self.global.default_storage = name.to_string();
        self
    }

    pub fn with_default_connection(mut self, name: &str) -> Self {
        self.global.default_connection = Some(name.to_string());
        self
    }

    pub fn with_default_compression(mut self, codec: &str) -> Self {
        self.global.default_compression = Some(codec.to_string());
        self
    }

    /// Set the retention policy
    pub fn with_retention(mut self, database_days: i64, filesystem_days: i64) -> Self {
        self.retention = RetentionPolicy {
            database_days,
            filesystem_days,
        };
        self
    }

    pub fn with_default_excludes(mut self, excludes: Vec<String>) -> Self {
        self.filesystem.default_excludes = excludes;
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn base_dir(&self) -> &Path {
        &self.global.base_dir
    }

    /// Get a local storage path
    pub fn storage_path(&self, name: &str) -> Option<PathBuf> {
        match self.storage.get(name) {
            Some(StorageConfig::Local { path }) => Some(path.clone()),
            _ => None,
        }
    }

    fn config(&self) -> Config {
        Config {
            global: self.global.clone(),
            retention: self.retention,
            storage: self.storage.clone(),
            connections: self.connections.clone(),
            filesystem: self.filesystem.clone(),
            notifications: self.notifications.clone(),
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string(&self.config()).expect("Failed to serialize config")
    }

    /// Build the Config
    pub fn build(self) -> Config {
        self.config()
    }

    /// Keep the temp directory (don't delete on drop)
    pub fn persist(self) -> (Config, TempDir) {
        let config = self.config();
        (config, self.temp_dir)
    }

    /// Write `config.toml` into the temp directory and keep the directory
    pub fn write(self) -> (PathBuf, Config, TempDir) {
        let path = self.temp_dir.path().join("config.toml");
        fs::write(&path, self.to_toml()).expect("Failed to write config file");
        let (config, temp_dir) = self.persist();
        (path, config, temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
