//! Object storage through the `rclone` CLI
//!
//! Any remote rclone can reach (S3, GCS, B2, SFTP...) works; the backend
//! only needs a configured remote such as `s3:bucket/backups`.

use super::{checked_key, ListingEntry, RemoteListing, StorageBackend, StorageKind};
use crate::utils::{CommandExecutor, ToolEnv, DEFAULT_COMMAND_TIMEOUT};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One object from `rclone lsjson`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonItem {
    path: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    mod_time: Option<String>,
    #[serde(default)]
    is_dir: bool,
}

impl LsJsonItem {
    fn modified(&self) -> Option<DateTime<Utc>> {
        self.mod_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

pub struct RcloneStorage {
    name: String,
    remote: String,
    executor: Arc<dyn CommandExecutor>,
    env: ToolEnv,
    timeout: Duration,
}

impl RcloneStorage {
    pub fn new(name: &str, remote: &str, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            name: name.to_string(),
            remote: remote.trim_end_matches('/').to_string(),
            executor,
            env: ToolEnv::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Use a specific rclone configuration file
    pub fn with_config_file(mut self, path: &Path) -> Self {
        self.env.add("RCLONE_CONFIG", &path.to_string_lossy());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn remote_path(&self, key: &str) -> String {
        if key.is_empty() {
            self.remote.clone()
        } else {
            format!("{}/{}", self.remote, key)
        }
    }

    fn rclone(&self, args: Vec<String>) -> Result<String> {
        self.executor
            .run_stdout("rclone", &args, &self.env, self.timeout)
    }

    /// Stat a single object; `None` when it does not exist
    fn stat(&self, key: &str) -> Result<Option<LsJsonItem>> {
        let args = vec![
            "lsjson".to_string(),
            "--stat".to_string(),
            self.remote_path(key),
        ];
        match self.rclone(args) {
            Ok(stdout) => {
                let item: LsJsonItem = serde_json::from_str(stdout.trim())
                    .with_context(|| format!("Failed to parse rclone stat for {}", key))?;
                Ok(Some(item))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_level(&self, prefix: &str) -> Result<Vec<LsJsonItem>> {
        let args = vec!["lsjson".to_string(), self.remote_path(prefix)];
        match self.rclone(args) {
            Ok(stdout) => {
                let items: Vec<LsJsonItem> = serde_json::from_str(stdout.trim())
                    .with_context(|| format!("Failed to parse rclone listing of '{}'", prefix))?;
                Ok(items)
            }
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn is_not_found(error: &anyhow::Error) -> bool {
    format!("{:#}", error).to_lowercase().contains("not found")
}

fn to_listing(key: String, item: &LsJsonItem) -> ListingEntry {
    ListingEntry::Remote(RemoteListing {
        path: key,
        size: item.size.max(0) as u64,
        modified: item.modified(),
    })
}

impl StorageBackend for RcloneStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Remote
    }

    fn store(&self, local_path: &Path, key: &str) -> Result<bool> {
        let key = checked_key(key)?;
        let verb = if local_path.is_dir() { "copy" } else { "copyto" };
        debug!("rclone {} {} -> {}", verb, local_path.display(), self.remote_path(key));

        self.rclone(vec![
            verb.to_string(),
            local_path.to_string_lossy().to_string(),
            self.remote_path(key),
        ])
        .with_context(|| format!("Failed to upload {} to '{}'", key, self.name))?;
        Ok(true)
    }

    fn retrieve(&self, key: &str, local_path: &Path) -> Result<bool> {
        let key = checked_key(key)?;
        let item = match self.stat(key)? {
            Some(item) => item,
            None => return Ok(false),
        };
        let verb = if item.is_dir { "copy" } else { "copyto" };

        self.rclone(vec![
            verb.to_string(),
            self.remote_path(key),
            local_path.to_string_lossy().to_string(),
        ])
        .with_context(|| format!("Failed to download {} from '{}'", key, self.name))?;
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let key = checked_key(key)?;
        let item = match self.stat(key)? {
            Some(item) => item,
            None => return Ok(true),
        };
        let verb = if item.is_dir { "purge" } else { "deletefile" };

        match self.rclone(vec![verb.to_string(), self.remote_path(key)]) {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(true),
            Err(e) => Err(e.context(format!("Failed to delete {} from '{}'", key, self.name))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<ListingEntry>> {
        let prefix = prefix.trim_matches('/');
        let mut entries = Vec::new();

        if prefix.is_empty() {
            for type_dir in self.list_level("")?.into_iter().filter(|i| i.is_dir) {
                for item in self.list_level(&type_dir.path)? {
                    entries.push(to_listing(format!("{}/{}", type_dir.path, item.path), &item));
                }
            }
        } else {
            let prefix = checked_key(prefix)?;
            for item in self.list_level(prefix)? {
                entries.push(to_listing(format!("{}/{}", prefix, item.path), &item));
            }
        }

        Ok(entries)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(checked_key(key)?)?.is_some())
    }
}
