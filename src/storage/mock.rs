//! In-memory storage backend for tests
//! Available for use in external test crates

use super::{key_backup_type, ListingEntry, LocalListing, RemoteListing, StorageBackend, StorageKind};
use crate::models::{artifact_name, catalog_id};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Which listing shape a [`MockStorage`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingShape {
    Local,
    Remote,
}

#[derive(Debug, Clone, Default)]
struct MockObject {
    /// Relative path and content; a single file has an empty relative path
    files: Vec<(PathBuf, Vec<u8>)>,
    is_dir: bool,
    modified: Option<DateTime<Utc>>,
}

impl MockObject {
    fn size(&self) -> u64 {
        self.files.iter().map(|(_, c)| c.len() as u64).sum()
    }
}

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<String, MockObject>,
    store_calls: Vec<String>,
    retrieve_calls: Vec<String>,
    delete_calls: Vec<String>,
    list_calls: Vec<String>,
    reject_store: bool,
    fail_store: bool,
    fail_retrieve: bool,
    fail_delete: bool,
    fail_list: bool,
}

/// Records every call; clones share state so tests can keep a handle
#[derive(Clone)]
pub struct MockStorage {
    name: String,
    kind: StorageKind,
    shape: ListingShape,
    state: Arc<Mutex<MockState>>,
}

impl MockStorage {
    /// Remote-kind backend reporting the remote listing shape
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: StorageKind::Remote,
            shape: ListingShape::Remote,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Local-kind backend reporting the local listing shape
    pub fn local(name: &str) -> Self {
        Self {
            kind: StorageKind::Local,
            shape: ListingShape::Local,
            ..Self::new(name)
        }
    }

    pub fn with_shape(mut self, shape: ListingShape) -> Self {
        self.shape = shape;
        self
    }

    /// Seed an object last modified `age` ago
    pub fn with_object(self, key: &str, age: Duration) -> Self {
        self.with_object_at(key, Some(Utc::now() - age))
    }

    /// Seed an object with an explicit (or missing) modification time
    pub fn with_object_at(self, key: &str, modified: Option<DateTime<Utc>>) -> Self {
        self.with_state(|s| {
            s.objects.insert(
                key.to_string(),
                MockObject {
                    files: vec![(PathBuf::new(), b"mock".to_vec())],
                    is_dir: false,
                    modified,
                },
            );
        })
    }

    /// `store` returns `Ok(false)`
    pub fn rejecting_store(self) -> Self {
        self.with_state(|s| s.reject_store = true)
    }

    /// `store` returns an error
    pub fn failing_store(self) -> Self {
        self.with_state(|s| s.fail_store = true)
    }

    pub fn failing_retrieve(self) -> Self {
        self.with_state(|s| s.fail_retrieve = true)
    }

    pub fn failing_delete(self) -> Self {
        self.with_state(|s| s.fail_delete = true)
    }

    pub fn failing_list(self) -> Self {
        self.with_state(|s| s.fail_list = true)
    }

    pub fn store_calls(&self) -> Vec<String> {
        self.read(|s| s.store_calls.clone())
    }

    pub fn retrieve_calls(&self) -> Vec<String> {
        self.read(|s| s.retrieve_calls.clone())
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.read(|s| s.delete_calls.clone())
    }

    pub fn list_calls(&self) -> Vec<String> {
        self.read(|s| s.list_calls.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.read(|s| s.objects.keys().cloned().collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read(|s| s.objects.contains_key(key))
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
        self
    }

    fn read<T: Default>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        self.state.lock().map(|mut s| f(&mut s)).unwrap_or_default()
    }

    fn snapshot(local_path: &Path) -> Result<MockObject> {
        if local_path.is_file() {
            return Ok(MockObject {
                files: vec![(PathBuf::new(), fs::read(local_path)?)],
                is_dir: false,
                modified: Some(Utc::now()),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(local_path).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(local_path)?.to_path_buf();
                files.push((rel, fs::read(entry.path())?));
            }
        }
        Ok(MockObject {
            files,
            is_dir: true,
            modified: Some(Utc::now()),
        })
    }

    fn to_listing(&self, key: &str, object: &MockObject) -> ListingEntry {
        match self.shape {
            ListingShape::Remote => ListingEntry::Remote(RemoteListing {
                path: key.to_string(),
                size: object.size(),
                modified: object.modified,
            }),
            ListingShape::Local => {
                let file_name = key.rsplit('/').next().unwrap_or(key);
                ListingEntry::Local(LocalListing {
                    id: catalog_id(&self.name, key),
                    backup_type: key_backup_type(key),
                    name: artifact_name(file_name),
                    key: key.to_string(),
                    file_path: PathBuf::from(key),
                    file_size: object.size(),
                    created_at: object.modified.unwrap_or_else(Utc::now),
                    storage: self.name.clone(),
                })
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("mock storage state poisoned"))
    }
}

impl StorageBackend for MockStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn store(&self, local_path: &Path, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        state.store_calls.push(key.to_string());
        if state.fail_store {
            anyhow::bail!("mock store failure for {}", key);
        }
        if state.reject_store {
            return Ok(false);
        }
        let object = Self::snapshot(local_path)?;
        state.objects.insert(key.to_string(), object);
        Ok(true)
    }

    fn retrieve(&self, key: &str, local_path: &Path) -> Result<bool> {
        let mut state = self.lock()?;
        state.retrieve_calls.push(key.to_string());
        if state.fail_retrieve {
            anyhow::bail!("mock retrieve failure for {}", key);
        }
        let object = match state.objects.get(key) {
            Some(object) => object.clone(),
            None => return Ok(false),
        };
        drop(state);

        if object.is_dir {
            for (rel, content) in &object.files {
                let target = local_path.join(rel);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(target, content)?;
            }
            fs::create_dir_all(local_path)?;
        } else {
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = object.files.first().map(|(_, c)| c.clone()).unwrap_or_default();
            fs::write(local_path, content)?;
        }
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        state.delete_calls.push(key.to_string());
        if state.fail_delete {
            anyhow::bail!("mock delete failure for {}", key);
        }
        state.objects.remove(key);
        Ok(true)
    }

    fn list(&self, prefix: &str) -> Result<Vec<ListingEntry>> {
        let mut state = self.lock()?;
        state.list_calls.push(prefix.to_string());
        if state.fail_list {
            anyhow::bail!("mock list failure for '{}'", prefix);
        }
        let prefix = prefix.trim_matches('/');
        let dir_prefix = format!("{}/", prefix);

        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| prefix.is_empty() || key.starts_with(&dir_prefix))
            .map(|(key, object)| self.to_listing(key, object))
            .collect())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.objects.contains_key(key))
    }
}
