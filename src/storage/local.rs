//! Directory-rooted storage on the local filesystem

use super::{checked_key, key_backup_type, ListingEntry, LocalListing, StorageBackend, StorageKind};
use crate::models::{artifact_name, catalog_id};
use crate::utils::fs::{copy_tree, path_size, remove_path, ExclusionSet};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stores artifacts below a root directory, one file or directory per key
#[derive(Debug, Clone)]
pub struct LocalStorage {
    name: String,
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_key(key)?))
    }

    fn listing_for(&self, key: String, path: &Path) -> Option<ListingEntry> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                return None;
            }
        };
        let created_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let file_name = path.file_name()?.to_string_lossy().to_string();

        Some(ListingEntry::Local(LocalListing {
            id: catalog_id(&self.name, &key),
            backup_type: key_backup_type(&key),
            name: artifact_name(&file_name),
            file_path: path.to_path_buf(),
            file_size: path_size(path).unwrap_or(0),
            created_at,
            storage: self.name.clone(),
            key,
        }))
    }

    fn visible_children(dir: &Path) -> Vec<PathBuf> {
        let mut children: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| !n.to_string_lossy().starts_with('.'))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        children.sort();
        children
    }
}

impl StorageBackend for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    fn store(&self, local_path: &Path, key: &str) -> Result<bool> {
        let target = self.resolve(key)?;
        if target == local_path {
            return Ok(true);
        }
        if !local_path.exists() {
            anyhow::bail!("Nothing to store at {}", local_path.display());
        }

        debug!("Storing {} as {}", local_path.display(), target.display());
        remove_path(&target)?;
        copy_tree(local_path, &target, &ExclusionSet::default())
            .with_context(|| format!("Failed to store {} in '{}'", key, self.name))?;
        Ok(true)
    }

    fn retrieve(&self, key: &str, local_path: &Path) -> Result<bool> {
        let source = self.resolve(key)?;
        if !source.exists() {
            return Ok(false);
        }
        if source == local_path {
            return Ok(true);
        }

        copy_tree(&source, local_path, &ExclusionSet::default())
            .with_context(|| format!("Failed to retrieve {} from '{}'", key, self.name))?;
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        remove_path(&path)?;
        Ok(true)
    }

    fn list(&self, prefix: &str) -> Result<Vec<ListingEntry>> {
        let prefix = prefix.trim_matches('/');
        let mut entries = Vec::new();

        if prefix.is_empty() {
            for type_dir in Self::visible_children(&self.root) {
                if !type_dir.is_dir() {
                    continue;
                }
                let type_name = type_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                for child in Self::visible_children(&type_dir) {
                    let file_name = child
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    entries.extend(self.listing_for(format!("{}/{}", type_name, file_name), &child));
                }
            }
            return Ok(entries);
        }

        let dir = self.resolve(prefix)?;
        for child in Self::visible_children(&dir) {
            let file_name = child
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            entries.extend(self.listing_for(format!("{}/{}", prefix, file_name), &child));
        }
        Ok(entries)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.resolve(key)?.exists())
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        self.resolve(key).ok()
    }
}
