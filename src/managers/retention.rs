//! Retention sweep
//!
//! Every registered backend is listed for every retained type, whichever
//! backend a type's backups were actually written to.

use crate::config::RetentionPolicy;
use crate::models::BackupType;
use crate::storage::{ListingEntry, StorageBackend};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An entry the sweep acted on (or would have)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionAction {
    pub storage: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

/// What one sweep did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    /// Entries with a usable timestamp that were compared to the cutoff
    pub examined: usize,
    pub deleted: Vec<RetentionAction>,
    /// Dry-run matches
    pub would_delete: Vec<RetentionAction>,
    pub failed: Vec<RetentionAction>,
    /// Types with retention disabled
    pub skipped_types: Vec<BackupType>,
    /// Backends that could not be listed
    pub errors: Vec<String>,
}

impl RetentionReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.errors.is_empty()
    }
}

/// Delete entries older than the policy allows
///
/// An entry is expired when its timestamp is strictly before
/// `now - days`. Entries without a timestamp are skipped. A failing delete
/// or listing is recorded and the sweep carries on.
pub fn apply_retention(
    backends: &[Arc<dyn StorageBackend>],
    policy: &RetentionPolicy,
    type_filter: Option<BackupType>,
    dry_run: bool,
    now: DateTime<Utc>,
) -> RetentionReport {
    let mut report = RetentionReport::default();
    let types: Vec<BackupType> = match type_filter {
        Some(t) => vec![t],
        None => BackupType::RETAINED.to_vec(),
    };

    for backup_type in types {
        let days = policy.days_for(backup_type);
        if days <= 0 {
            info!("Retention disabled for {} backups, skipping", backup_type);
            report.skipped_types.push(backup_type);
            continue;
        }

        let cutoff = now - Duration::days(days);
        info!(
            "Applying {}-day retention to {} backups (cutoff {})",
            days,
            backup_type,
            cutoff.format("%Y-%m-%d %H:%M:%S")
        );

        for backend in backends {
            sweep_backend(backend.as_ref(), backup_type, cutoff, dry_run, &mut report);
        }
    }

    info!(
        "Retention finished: {} examined, {} deleted, {} would be deleted, {} failed",
        report.examined,
        report.deleted.len(),
        report.would_delete.len(),
        report.failed.len()
    );
    report
}

fn sweep_backend(
    backend: &dyn StorageBackend,
    backup_type: BackupType,
    cutoff: DateTime<Utc>,
    dry_run: bool,
    report: &mut RetentionReport,
) {
    let listing = match backend.list(backup_type.as_str()) {
        Ok(listing) => listing,
        Err(e) => {
            warn!("Failed to list '{}' for retention: {:#}", backend.name(), e);
            report.errors.push(format!("{}: {:#}", backend.name(), e));
            return;
        }
    };

    for entry in listing {
        let timestamp = match &entry {
            ListingEntry::Local(local) => local.created_at,
            ListingEntry::Remote(remote) => match remote.modified {
                Some(modified) => modified,
                None => {
                    debug!("No timestamp for {} on '{}', skipping", remote.path, backend.name());
                    continue;
                }
            },
        };
        report.examined += 1;

        if timestamp >= cutoff {
            continue;
        }

        let action = RetentionAction {
            storage: backend.name().to_string(),
            key: entry.key().to_string(),
            timestamp,
        };

        if dry_run {
            info!("[dry-run] Would delete {} from '{}'", action.key, action.storage);
            report.would_delete.push(action);
            continue;
        }

        match backend.delete(&action.key) {
            Ok(true) => {
                info!("Deleted expired {} from '{}'", action.key, action.storage);
                report.deleted.push(action);
            }
            Ok(false) => {
                warn!("Storage '{}' refused to delete {}", action.storage, action.key);
                report.failed.push(action);
            }
            Err(e) => {
                warn!("Failed to delete {} from '{}': {:#}", action.key, action.storage, e);
                report.failed.push(action);
            }
        }
    }
}
