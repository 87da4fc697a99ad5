//! In-memory catalog of known backups
//!
//! The catalog is a cache over storage listings. It is only rebuilt when
//! [`Catalog::refresh`] is called; between refreshes it reflects what this
//! process has backed up, deleted or swept.

use crate::models::{artifact_name, catalog_id, BackupType};
use crate::storage::{key_backup_type, ListingEntry, StorageBackend};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// One known backup artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub name: String,
    /// Local path of the artifact (for remote entries, where it was produced
    /// or the storage key when unknown)
    pub path: PathBuf,
    /// Storage key inside `storage`
    pub key: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub storage: String,
    pub metadata: BTreeMap<String, String>,
}

impl CatalogEntry {
    /// Build an entry from whatever shape a backend listed
    pub fn from_listing(listing: &ListingEntry, backend: &dyn StorageBackend) -> Self {
        match listing {
            ListingEntry::Local(local) => Self {
                id: local.id.clone(),
                backup_type: local.backup_type,
                name: local.name.clone(),
                path: local.file_path.clone(),
                key: local.key.clone(),
                size: local.file_size,
                created_at: local.created_at,
                storage: local.storage.clone(),
                metadata: BTreeMap::new(),
            },
            ListingEntry::Remote(remote) => {
                let file_name = remote.path.rsplit('/').next().unwrap_or(&remote.path);
                Self {
                    id: catalog_id(backend.name(), &remote.path),
                    backup_type: key_backup_type(&remote.path),
                    name: artifact_name(file_name),
                    path: backend
                        .local_path(&remote.path)
                        .unwrap_or_else(|| PathBuf::from(&remote.path)),
                    key: remote.path.clone(),
                    size: remote.size,
                    created_at: remote.modified.unwrap_or_default(),
                    storage: backend.name().to_string(),
                    metadata: BTreeMap::new(),
                }
            }
        }
    }
}

/// Bytes held per backup type, computed from the catalog alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub by_type: BTreeMap<BackupType, u64>,
    pub total: u64,
    pub count: usize,
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from every backend's full listing
    ///
    /// A backend that fails to list keeps the entries it had before.
    pub fn refresh(&mut self, backends: &[Arc<dyn StorageBackend>]) -> usize {
        let mut rebuilt = BTreeMap::new();

        for backend in backends {
            match backend.list("") {
                Ok(listing) => {
                    debug!("Storage '{}' listed {} object(s)", backend.name(), listing.len());
                    for item in &listing {
                        let mut entry = CatalogEntry::from_listing(item, backend.as_ref());
                        // Keep what this process recorded for the same artifact
                        if let Some(known) = self.entries.get(&entry.id) {
                            entry.metadata = known.metadata.clone();
                            if backend.local_path(&entry.key).is_none() {
                                entry.path = known.path.clone();
                            }
                        }
                        rebuilt.insert(entry.id.clone(), entry);
                    }
                }
                Err(e) => {
                    warn!("Failed to list storage '{}': {:#}", backend.name(), e);
                    for (id, entry) in &self.entries {
                        if entry.storage == backend.name() {
                            rebuilt.insert(id.clone(), entry.clone());
                        }
                    }
                }
            }
        }

        self.entries = rebuilt;
        self.refreshed_at = Some(Utc::now());
        self.entries.len()
    }

    /// When [`Catalog::refresh`] last ran; `None` if never
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<CatalogEntry> {
        self.entries.remove(id)
    }

    /// Entries, newest first
    pub fn list(&self, type_filter: Option<BackupType>) -> Vec<&CatalogEntry> {
        let mut entries: Vec<&CatalogEntry> = self
            .entries
            .values()
            .filter(|e| type_filter.map_or(true, |t| e.backup_type == t))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        entries
    }

    pub fn last(&self, type_filter: Option<BackupType>) -> Option<&CatalogEntry> {
        self.entries
            .values()
            .filter(|e| type_filter.map_or(true, |t| e.backup_type == t))
            .max_by_key(|e| e.created_at)
    }

    pub fn usage(&self) -> StorageUsage {
        let mut usage = StorageUsage::default();
        for entry in self.entries.values() {
            *usage.by_type.entry(entry.backup_type).or_insert(0) += entry.size;
            usage.total += entry.size;
            usage.count += 1;
        }
        usage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
