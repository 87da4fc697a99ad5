//! Storage backends
//!
//! A backend is a blob store keyed by a relative path such as
//! `database/shop_2025-01-01_00-00-00.sql.gz`. Listings come back in one of
//! two shapes: backends that know about backups (local disk) report
//! [`LocalListing`]s, plain object stores report [`RemoteListing`]s.

pub mod local;
pub mod mock;
pub mod rclone;

pub use self::local::LocalStorage;
pub use self::rclone::RcloneStorage;

use crate::models::BackupType;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Where a backend keeps its data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Remote,
}

/// Listing entry produced by a backend that understands backup artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalListing {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub name: String,
    /// Storage key, relative to the backend root
    pub key: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub storage: String,
}

/// Listing entry produced by a plain object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteListing {
    /// Storage key, relative to the backend root
    pub path: String,
    pub size: u64,
    /// Missing when the store did not report a usable modification time
    pub modified: Option<DateTime<Utc>>,
}

/// One object reported by [`StorageBackend::list`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum ListingEntry {
    Local(LocalListing),
    Remote(RemoteListing),
}

impl ListingEntry {
    /// Key to pass back to the backend for retrieve/delete
    pub fn key(&self) -> &str {
        match self {
            ListingEntry::Local(entry) => &entry.key,
            ListingEntry::Remote(entry) => &entry.path,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            ListingEntry::Local(entry) => entry.file_size,
            ListingEntry::Remote(entry) => entry.size,
        }
    }

    /// Age reference used by retention: `created_at` or `modified`
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            ListingEntry::Local(entry) => Some(entry.created_at),
            ListingEntry::Remote(entry) => entry.modified,
        }
    }
}

/// Durable blob store used by the orchestrator and the retention sweep
pub trait StorageBackend: Send + Sync {
    /// Registered name of this backend
    fn name(&self) -> &str;

    fn kind(&self) -> StorageKind;

    /// Copy a local file or directory to `key`
    fn store(&self, local_path: &Path, key: &str) -> Result<bool>;

    /// Copy `key` to a local path; `false` if the key does not exist
    fn retrieve(&self, key: &str, local_path: &Path) -> Result<bool>;

    /// Remove `key`; deleting an absent key succeeds
    fn delete(&self, key: &str) -> Result<bool>;

    /// Objects under `prefix` (one backup per entry)
    fn list(&self, prefix: &str) -> Result<Vec<ListingEntry>>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Direct filesystem path of `key`, for backends that have one
    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

/// Storage key for an artifact: `{type}/{file name}`
pub fn storage_key(backup_type: BackupType, artifact: &Path) -> String {
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}/{}", backup_type, file_name)
}

/// Backup type encoded in the first component of a storage key
pub fn key_backup_type(key: &str) -> BackupType {
    key.split('/')
        .next()
        .and_then(|first| first.parse().ok())
        .unwrap_or(BackupType::Custom)
}

/// Reject keys that could escape the backend root
pub(crate) fn checked_key(key: &str) -> Result<&str> {
    let key = key.trim_matches('/');
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || escapes {
        anyhow::bail!("Invalid storage key: '{}'", key);
    }
    Ok(key)
}
