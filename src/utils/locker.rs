//! File-based locking to prevent overlapping operations on the same artifact
//!
//! Rust's `&mut` receiver already serialises orchestrator calls inside one
//! process; the lock file extends that to separate processes (e.g. a cron
//! backup racing a manual restore).

use anyhow::{Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock file for one operation key
///
/// Open it, then hold the guard returned by [`OperationLock::try_acquire`]
/// for as long as the operation runs. The file itself is left behind so two
/// processes never race on creating and deleting it.
pub struct OperationLock {
    lock: RwLock<File>,
    key: String,
    lock_path: PathBuf,
}

impl OperationLock {
    /// Open (creating if needed) the lock file for `key` in `lock_dir`
    pub fn open(lock_dir: &Path, key: &str) -> Result<Self> {
        std::fs::create_dir_all(lock_dir)
            .with_context(|| format!("Failed to create lock directory: {:?}", lock_dir))?;

        let lock_path = Self::lock_path(lock_dir, key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        Ok(Self {
            lock: RwLock::new(file),
            key: key.to_string(),
            lock_path,
        })
    }

    /// Take the exclusive lock without blocking
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        debug!("Attempting to acquire lock: {:?}", self.lock_path);
        let key = self.key.clone();
        self.lock
            .try_write()
            .with_context(|| format!("'{}' is already in progress (lock held)", key))
    }

    /// Get the lock file path (for cleanup or inspection)
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    fn lock_path(lock_dir: &Path, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        lock_dir.join(format!("backup-orchestrator-{}.lock", safe))
    }
}
