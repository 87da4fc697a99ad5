//! Backup orchestrator - runs backup and restore workflows
//!
//! The orchestrator is the failure boundary for everything below it:
//! adapter, codec and storage faults come back as a failed
//! [`BackupOutcome`] from [`BackupOrchestrator::backup`] or as `false` from
//! [`BackupOrchestrator::restore`]. Only an unknown catalog id is an error.

use crate::adapters::{
    DatabasePlatform, FilesystemAdapter, MySqlAdapter, PostgresAdapter, SourceAdapter,
    SqlServerAdapter,
};
use crate::codecs::CompressionType;
use crate::config::{resolve_connections, Config, RetentionPolicy, StorageConfig};
use crate::error::{ArchiveError, OrchestratorError};
use crate::managers::archive::ArchiveCoordinator;
use crate::managers::catalog::{Catalog, CatalogEntry, StorageUsage};
use crate::managers::notification::{BackupEvent, NotificationSink, WebhookNotifier};
use crate::managers::retention::{self, RetentionReport};
use crate::models::{artifact_stem, catalog_id, BackupOutcome, BackupRequest, BackupType, RestoreOptions};
use crate::storage::{storage_key, LocalStorage, RcloneStorage, StorageBackend, StorageKind};
use crate::utils::fs::{dir_entries, path_size, remove_path};
use crate::utils::{CommandExecutor, OperationLock, RealExecutor};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Name of the storage backend implicitly rooted at the base directory
pub const LOCAL_STORAGE: &str = "local";

/// Outcome metadata keys set by the orchestrator
const META_STORAGE: &str = "storage";
const META_STORAGE_KEY: &str = "storage_key";

pub struct BackupOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    storages: BTreeMap<String, Arc<dyn StorageBackend>>,
    archive: ArchiveCoordinator,
    sinks: Vec<Arc<dyn NotificationSink>>,
    catalog: Catalog,
    base_dir: PathBuf,
    default_storage: String,
    default_connection: Option<String>,
    default_compression: Option<String>,
    retention: RetentionPolicy,
    lock_dir: Option<PathBuf>,
    connections: BTreeMap<String, DatabasePlatform>,
}

/// Assembles a [`BackupOrchestrator`]; registries are fixed once built
#[derive(Default)]
pub struct OrchestratorBuilder {
    base_dir: Option<PathBuf>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    storages: Vec<Arc<dyn StorageBackend>>,
    archive: Option<ArchiveCoordinator>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    default_storage: Option<String>,
    default_connection: Option<String>,
    default_compression: Option<String>,
    retention: RetentionPolicy,
    lock_dir: Option<PathBuf>,
    connections: BTreeMap<String, DatabasePlatform>,
}

impl OrchestratorBuilder {
    /// Root of `{base_dir}/{type}` output directories (required)
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn adapter(self, adapter: impl SourceAdapter + 'static) -> Self {
        self.shared_adapter(Arc::new(adapter))
    }

    pub fn shared_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn storage(self, storage: impl StorageBackend + 'static) -> Self {
        self.shared_storage(Arc::new(storage))
    }

    pub fn shared_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storages.push(storage);
        self
    }

    /// Codec registry; zip and gzip when not set
    pub fn archive(mut self, archive: ArchiveCoordinator) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn default_storage(mut self, name: &str) -> Self {
        self.default_storage = Some(name.to_string());
        self
    }

    pub fn default_connection(mut self, name: &str) -> Self {
        self.default_connection = Some(name.to_string());
        self
    }

    pub fn default_compression(mut self, codec: &str) -> Self {
        self.default_compression = Some(codec.to_string());
        self
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    /// Directory for cross-process lock files; no file locking when unset
    pub fn lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Declare a connection that has no adapter bound to it by name
    pub fn connection(mut self, name: &str, platform: DatabasePlatform) -> Self {
        self.connections.insert(name.to_string(), platform);
        self
    }

    pub fn build(self) -> OrchestratorResult<BackupOrchestrator> {
        let base_dir = self
            .base_dir
            .ok_or_else(|| OrchestratorError::Setup("base_dir is required".to_string()))?;

        if let Some(codec) = &self.default_compression {
            codec
                .parse::<CompressionType>()
                .map_err(|_| OrchestratorError::Setup(format!("Unsupported default compression '{}'", codec)))?;
        }

        let mut storages: BTreeMap<String, Arc<dyn StorageBackend>> = BTreeMap::new();
        for storage in self.storages {
            let name = storage.name().to_string();
            if storages.insert(name.clone(), storage).is_some() {
                return Err(OrchestratorError::Setup(format!(
                    "Storage backend '{}' registered twice",
                    name
                )));
            }
        }

        let default_storage = self.default_storage.unwrap_or_else(|| LOCAL_STORAGE.to_string());
        if !storages.contains_key(&default_storage) {
            if default_storage != LOCAL_STORAGE {
                return Err(OrchestratorError::UnknownStorage(default_storage));
            }
            storages.insert(
                LOCAL_STORAGE.to_string(),
                Arc::new(LocalStorage::new(LOCAL_STORAGE, &base_dir)),
            );
        }

        let mut connections = self.connections;
        for handle in self.adapters.iter().filter_map(|a| a.connection()) {
            connections.entry(handle.name).or_insert(handle.platform);
        }

        if let Some(name) = &self.default_connection {
            if !connections.contains_key(name) && name.parse::<DatabasePlatform>().is_err() {
                return Err(OrchestratorError::Setup(format!(
                    "Default connection '{}' is not known",
                    name
                )));
            }
        }

        Ok(BackupOrchestrator {
            adapters: self.adapters,
            storages,
            archive: self.archive.unwrap_or_else(ArchiveCoordinator::with_default_codecs),
            sinks: self.sinks,
            catalog: Catalog::new(),
            base_dir,
            default_storage,
            default_connection: self.default_connection,
            default_compression: self.default_compression,
            retention: self.retention,
            lock_dir: self.lock_dir,
            connections,
        })
    }
}

impl BackupOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Build the full stack described by a configuration file
    ///
    /// Registers the filesystem adapter, one database adapter per
    /// connection, every configured storage backend (plus a `local` one at
    /// `base_dir` when that is the default) and the webhook sink when a URL
    /// is set.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let global = &config.global;
        let timeout = Duration::from_secs(global.command_timeout_seconds);
        let executor: Arc<dyn CommandExecutor> = Arc::new(RealExecutor::new());
        let safety_dir = global.base_dir.join(".pre-restore");

        let mut builder = Self::builder()
            .base_dir(&global.base_dir)
            .default_storage(&global.default_storage)
            .retention(config.retention)
            .lock_dir(&global.lock_directory)
            .adapter(
                FilesystemAdapter::new()
                    .with_default_paths(config.filesystem.default_paths.clone())
                    .with_default_excludes(config.filesystem.default_excludes.clone()),
            );

        for connection in resolve_connections(config)? {
            builder = match connection.platform {
                DatabasePlatform::MySql => builder.adapter(
                    MySqlAdapter::new(connection, executor.clone())
                        .with_timeout(timeout)
                        .with_safety_dir(safety_dir.clone()),
                ),
                DatabasePlatform::Postgres => builder.adapter(
                    PostgresAdapter::new(connection, executor.clone())
                        .with_timeout(timeout)
                        .with_safety_dir(safety_dir.clone()),
                ),
                DatabasePlatform::SqlServer => builder.adapter(
                    SqlServerAdapter::new(connection, executor.clone())
                        .with_timeout(timeout)
                        .with_safety_dir(safety_dir.clone()),
                ),
            };
        }

        for (name, storage) in &config.storage {
            builder = match storage {
                StorageConfig::Local { path } => builder.storage(LocalStorage::new(name, path)),
                StorageConfig::Rclone {
                    remote,
                    config_file,
                } => {
                    let mut rclone =
                        RcloneStorage::new(name, remote, executor.clone()).with_timeout(timeout);
                    if let Some(file) = config_file {
                        rclone = rclone.with_config_file(file);
                    }
                    builder.storage(rclone)
                }
            };
        }

        if !config.notifications.webhook_url.is_empty() {
            builder = builder.sink(WebhookNotifier::new(config.notifications.clone()));
        }
        if let Some(name) = &global.default_connection {
            builder = builder.default_connection(name);
        }
        if let Some(codec) = &global.default_compression {
            builder = builder.default_compression(codec);
        }

        Ok(builder.build()?)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn default_storage(&self) -> &str {
        &self.default_storage
    }

    pub fn storage_names(&self) -> Vec<&str> {
        self.storages.keys().map(String::as_str).collect()
    }

    /// Pick the adapter for a type string
    ///
    /// Adapters that need no connection win. Connection-bound adapters are
    /// only considered when a connection is named, defaulted, or is the only
    /// one declared; the bound connection must match it by name first, then
    /// by platform.
    pub fn resolve(
        &self,
        backup_type: &str,
        connection: Option<&str>,
    ) -> OrchestratorResult<Arc<dyn SourceAdapter>> {
        if let Some(adapter) = self
            .adapters
            .iter()
            .find(|a| !a.requires_connection() && a.supports(backup_type))
        {
            debug!("Resolved '{}' to adapter '{}'", backup_type, adapter.name());
            return Ok(adapter.clone());
        }

        let not_found = || OrchestratorError::NoAdapterFound {
            backup_type: backup_type.to_string(),
        };

        let only_connection = if self.connections.len() == 1 {
            self.connections.keys().next().map(String::as_str)
        } else {
            None
        };
        let wanted = match connection
            .or(self.default_connection.as_deref())
            .or(only_connection)
        {
            Some(wanted) => wanted,
            None => return Err(not_found()),
        };
        let wanted_platform = self
            .connections
            .get(wanted)
            .copied()
            .or_else(|| wanted.parse::<DatabasePlatform>().ok());

        let candidates: Vec<_> = self
            .adapters
            .iter()
            .filter(|a| a.requires_connection() && a.supports(backup_type))
            .filter_map(|a| a.connection().map(|handle| (a, handle)))
            .collect();

        let by_name = candidates.iter().find(|(_, handle)| handle.name == wanted);
        let by_platform = || {
            candidates
                .iter()
                .find(|(_, handle)| Some(handle.platform) == wanted_platform)
        };

        match by_name.or_else(by_platform) {
            Some((adapter, handle)) => {
                debug!(
                    "Resolved '{}' to adapter '{}' on connection '{}'",
                    backup_type,
                    adapter.name(),
                    handle.name
                );
                Ok((*adapter).clone())
            }
            None => Err(not_found()),
        }
    }

    /// Run one backup; never fails, a failure is a failed outcome
    pub fn backup(&mut self, request: BackupRequest) -> BackupOutcome {
        let started = Instant::now();
        let request = self.with_defaults(request);

        info!(
            "Starting {} backup '{}' to storage '{}'",
            request.backup_type,
            request.name,
            request.storage.as_deref().unwrap_or(&self.default_storage)
        );
        self.notify(&BackupEvent::PreBackup { request: &request });

        let mut outcome = match self.run_backup(&request, started) {
            Ok(outcome) => outcome,
            Err(e) => BackupOutcome::failed(e.outcome_message()).with_metadata("error_kind", e.kind()),
        };
        outcome.backfill_duration(started.elapsed().as_secs_f64());

        if outcome.is_success() {
            info!(
                "Backup '{}' completed in {:.1}s: {}",
                request.name,
                outcome.duration_secs().unwrap_or_default(),
                outcome.path().map(|p| p.display().to_string()).unwrap_or_default()
            );
            self.notify(&BackupEvent::PostBackup {
                request: &request,
                outcome: &outcome,
            });
            self.record_entry(&request, &outcome);
            self.retention_after_backup(request.backup_type);
        } else {
            error!(
                "Backup '{}' failed: {}",
                request.name,
                outcome.error().unwrap_or("unknown error")
            );
            self.notify(&BackupEvent::BackupFailed {
                request: &request,
                outcome: &outcome,
            });
        }

        outcome
    }

    fn with_defaults(&self, mut request: BackupRequest) -> BackupRequest {
        if request.storage.is_none() {
            request.storage = Some(self.default_storage.clone());
        }
        if request.compression.is_none() {
            request.compression = self.default_compression.clone();
        }
        if request.output_path.is_none() {
            request.output_path = Some(self.base_dir.join(request.backup_type.as_str()));
        }
        request
    }

    fn run_backup(&self, request: &BackupRequest, started: Instant) -> OrchestratorResult<BackupOutcome> {
        let output_dir = request
            .output_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_dir.join(request.backup_type.as_str()));
        fs::create_dir_all(&output_dir)?;

        let mut lock = self.open_lock(&format!("{}-{}", request.backup_type, request.name))?;
        let _guard = acquire(lock.as_mut())?;

        let storage_name = request.storage.as_deref().unwrap_or(&self.default_storage);
        let storage = self
            .storages
            .get(storage_name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownStorage(storage_name.to_string()))?;

        let adapter = self.resolve(request.backup_type.as_str(), request.connection.as_deref())?;

        let errors = adapter.validate(request);
        if !errors.is_empty() {
            return Err(OrchestratorError::ValidationFailed(errors));
        }

        let mut outcome = self.run_adapter(adapter.as_ref(), request, &output_dir)?;
        if !outcome.is_success() {
            return Ok(outcome);
        }
        outcome.insert_metadata("adapter", adapter.name());

        self.compress_artifact(request, &mut outcome)?;
        outcome.backfill_duration(started.elapsed().as_secs_f64());
        self.push_artifact(request, storage.as_ref(), &mut outcome);

        Ok(outcome)
    }

    /// Call the adapter inside a failure boundary
    ///
    /// Anything the adapter left in the output directory under the request's
    /// name is removed when it fails.
    fn run_adapter(
        &self,
        adapter: &dyn SourceAdapter,
        request: &BackupRequest,
        output_dir: &Path,
    ) -> OrchestratorResult<BackupOutcome> {
        let before = dir_entries(output_dir);

        let result = match panic::catch_unwind(AssertUnwindSafe(|| adapter.backup(request))) {
            Ok(Ok(outcome)) if outcome.is_success() => Ok(outcome),
            Ok(Ok(outcome)) => {
                cleanup_partial(output_dir, &before, &request.name);
                Ok(outcome)
            }
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(payload) => Err(panic_message(payload.as_ref())),
        };

        result.map_err(|message| {
            cleanup_partial(output_dir, &before, &request.name);
            OrchestratorError::AdapterFault {
                adapter: adapter.name().to_string(),
                message,
            }
        })
    }

    fn compress_artifact(&self, request: &BackupRequest, outcome: &mut BackupOutcome) -> OrchestratorResult<()> {
        let codec = match request.compression.as_deref() {
            Some(codec) => codec,
            None => return Ok(()),
        };
        let raw = match outcome.path() {
            Some(path) => path.to_path_buf(),
            None => return Ok(()),
        };
        if outcome.metadata().contains_key("compression")
            || ArchiveCoordinator::detect_compression_type(&raw).is_some()
        {
            debug!("{} is already compressed", raw.display());
            return Ok(());
        }

        let compressed = codec
            .parse::<CompressionType>()
            .map_err(|_| ArchiveError::UnsupportedCompression(codec.to_string()))
            .and_then(|kind| {
                let target = compressed_target(&raw, &request.name, outcome.created_at(), kind);
                let artifact = self.archive.compress(&raw, &target, codec, true)?;
                let size = path_size(&artifact).map_err(ArchiveError::Codec)?;
                Ok((kind, artifact, size))
            });

        match compressed {
            Ok((kind, artifact, size)) => {
                if let Some(original) = outcome.size() {
                    outcome.insert_metadata("original_size", original.to_string());
                }
                outcome.replace_artifact(artifact, size);
                outcome.insert_metadata("compression", kind.as_str());
                Ok(())
            }
            Err(e) => {
                // The outcome will be failed; nothing should remain on disk
                if let Err(cleanup) = remove_path(&raw) {
                    warn!("Failed to remove {} after compression failure: {}", raw.display(), cleanup);
                }
                Err(e.into())
            }
        }
    }

    /// Copy the artifact to its storage backend when it is not already there
    ///
    /// A local backend takes the artifact over: the outcome points at the
    /// stored copy and the working copy is removed. A failed push is logged
    /// and the entry stays on the default storage.
    fn push_artifact(&self, request: &BackupRequest, storage: &dyn StorageBackend, outcome: &mut BackupOutcome) {
        let artifact = match outcome.path() {
            Some(path) => path.to_path_buf(),
            None => return,
        };
        let key = storage_key(request.backup_type, &artifact);
        let mut recorded = self.default_storage.clone();
        let stored_at = storage.local_path(&key);

        if stored_at.as_deref() == Some(artifact.as_path()) {
            recorded = storage.name().to_string();
        } else {
            let pushed = match storage.store(&artifact, &key) {
                Ok(true) => Ok(()),
                Ok(false) => Err("storage rejected the artifact".to_string()),
                Err(e) => Err(format!("{:#}", e)),
            };
            match pushed {
                Ok(()) => {
                    info!("Stored {} in '{}'", key, storage.name());
                    recorded = storage.name().to_string();
                    if let Some(stored) = stored_at.filter(|p| p.exists()) {
                        adopt_stored_copy(outcome, &artifact, stored);
                    }
                }
                Err(message) => {
                    let fault = OrchestratorError::StoragePushFault {
                        storage: storage.name().to_string(),
                        message,
                    };
                    warn!("{}", fault);
                    outcome.insert_metadata("storage_push", "failed");
                }
            }
        }

        outcome.insert_metadata(META_STORAGE, recorded);
        outcome.insert_metadata(META_STORAGE_KEY, key);
    }

    fn record_entry(&mut self, request: &BackupRequest, outcome: &BackupOutcome) {
        let metadata = outcome.metadata();
        let (path, storage, key) = match (
            outcome.path(),
            metadata.get(META_STORAGE),
            metadata.get(META_STORAGE_KEY),
        ) {
            (Some(path), Some(storage), Some(key)) => (path, storage, key),
            _ => return,
        };

        let entry = CatalogEntry {
            id: catalog_id(storage, key),
            backup_type: request.backup_type,
            name: request.name.clone(),
            path: path.to_path_buf(),
            key: key.clone(),
            size: outcome.size().unwrap_or(0),
            created_at: outcome.created_at(),
            storage: storage.clone(),
            metadata: metadata.clone(),
        };
        debug!("Catalog entry {} for {}", entry.id, entry.key);
        self.catalog.insert(entry);
    }

    fn retention_after_backup(&mut self, backup_type: BackupType) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.apply_retention(Some(backup_type), false)));
        match result {
            Ok(report) if report.has_failures() => {
                warn!(
                    "Retention for {} finished with {} failed deletion(s) and {} listing error(s)",
                    backup_type,
                    report.failed.len(),
                    report.errors.len()
                );
            }
            Ok(_) => {}
            Err(payload) => warn!("Retention for {} aborted: {}", backup_type, panic_message(payload.as_ref())),
        }
    }

    /// Restore a catalog entry
    ///
    /// Returns `Err` only when the id is unknown. Every later fault is
    /// logged, reported as a restore failure and returned as `Ok(false)`.
    pub fn restore(&self, id: &str, options: &RestoreOptions) -> OrchestratorResult<bool> {
        let entry = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::BackupNotFound(id.to_string()))?;

        info!("Restoring '{}' ({}) from '{}'", entry.name, entry.id, entry.storage);
        self.notify(&BackupEvent::PreRestore { entry: &entry });

        let error = match panic::catch_unwind(AssertUnwindSafe(|| self.run_restore(&entry, options))) {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some("Adapter reported restore failure".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        match error {
            None => {
                info!("Restore of '{}' completed", entry.name);
                self.notify(&BackupEvent::PostRestore { entry: &entry });
                Ok(true)
            }
            Some(message) => {
                error!("Restore of '{}' failed: {}", entry.name, message);
                self.notify(&BackupEvent::RestoreFailed {
                    entry: &entry,
                    error: Some(message.as_str()),
                });
                Ok(false)
            }
        }
    }

    fn run_restore(&self, entry: &CatalogEntry, options: &RestoreOptions) -> OrchestratorResult<bool> {
        let mut lock = self.open_lock(&format!("restore-{}", entry.id))?;
        let _guard = acquire(lock.as_mut())?;

        let adapter = self.resolve(entry.backup_type.as_str(), options.connection.as_deref())?;
        let storage = self
            .storages
            .get(&entry.storage)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownStorage(entry.storage.clone()))?;

        // Dropped on every exit path, taking retrieved and extracted files with it
        let scratch = tempfile::Builder::new()
            .prefix("backup-orchestrator-restore-")
            .tempdir()?;

        let artifact = fetch_artifact(entry, storage.as_ref(), scratch.path())?;
        let resolved = if ArchiveCoordinator::detect_compression_type(&artifact).is_some() {
            let extracted = scratch.path().join("extracted");
            fs::create_dir_all(&extracted)?;
            self.archive.decompress(&artifact, Some(&extracted), true)?
        } else {
            artifact
        };
        debug!("Restoring from {}", resolved.display());

        adapter
            .restore(&resolved, options)
            .map_err(|e| OrchestratorError::AdapterFault {
                adapter: adapter.name().to_string(),
                message: format!("{:#}", e),
            })
    }

    /// Catalog entries, newest first
    pub fn list(&self, type_filter: Option<BackupType>) -> Vec<&CatalogEntry> {
        self.catalog.list(type_filter)
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.catalog.get(id)
    }

    pub fn get_last(&self, type_filter: Option<BackupType>) -> Option<&CatalogEntry> {
        self.catalog.last(type_filter)
    }

    /// Delete an entry from its storage backend, then from the catalog
    ///
    /// A working copy this orchestrator left outside the backend goes too.
    /// Returns `Ok(false)`, with the catalog untouched, when either delete
    /// fails.
    pub fn delete(&mut self, id: &str) -> OrchestratorResult<bool> {
        let entry = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::BackupNotFound(id.to_string()))?;
        let storage = self
            .storages
            .get(&entry.storage)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownStorage(entry.storage.clone()))?;

        match storage.delete(&entry.key) {
            Ok(true) => {
                if let Some(working) = working_copy(&entry, storage.as_ref()) {
                    if let Err(e) = remove_path(working) {
                        warn!("Failed to remove working copy {}: {:#}", working.display(), e);
                        return Ok(false);
                    }
                    debug!("Removed working copy {}", working.display());
                }
                self.catalog.remove(id);
                info!("Deleted {} from '{}'", entry.key, entry.storage);
                Ok(true)
            }
            Ok(false) => {
                warn!("Storage '{}' refused to delete {}", entry.storage, entry.key);
                Ok(false)
            }
            Err(e) => {
                warn!("Failed to delete {} from '{}': {:#}", entry.key, entry.storage, e);
                Ok(false)
            }
        }
    }

    /// Bytes per type, from the catalog only
    pub fn storage_usage(&self) -> StorageUsage {
        self.catalog.usage()
    }

    /// Rebuild the catalog from every backend's listing
    pub fn refresh_catalog(&mut self) -> usize {
        let backends: Vec<_> = self.storages.values().cloned().collect();
        let count = self.catalog.refresh(&backends);
        info!("Catalog refreshed: {} backup(s) across {} storage(s)", count, backends.len());
        count
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Sweep every backend; deleted entries leave the catalog too
    pub fn apply_retention(&mut self, type_filter: Option<BackupType>, dry_run: bool) -> RetentionReport {
        let backends: Vec<_> = self.storages.values().cloned().collect();
        let report = retention::apply_retention(&backends, &self.retention, type_filter, dry_run, Utc::now());

        for action in &report.deleted {
            self.catalog.remove(&catalog_id(&action.storage, &action.key));
        }
        report
    }

    fn notify(&self, event: &BackupEvent<'_>) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event) {
                warn!("Failed to send {:?} notification: {:#}", event.kind(), e);
            }
        }
    }

    fn open_lock(&self, key: &str) -> OrchestratorResult<Option<OperationLock>> {
        match &self.lock_dir {
            Some(dir) => OperationLock::open(dir, key)
                .map(Some)
                .map_err(|e| OrchestratorError::Locked(format!("{:#}", e))),
            None => Ok(None),
        }
    }
}

fn acquire(lock: Option<&mut OperationLock>) -> OrchestratorResult<Option<fd_lock::RwLockWriteGuard<'_, fs::File>>> {
    lock.map(|l| l.try_acquire())
        .transpose()
        .map_err(|e| OrchestratorError::Locked(format!("{:#}", e)))
}

/// The local artifact a backup recorded outside the entry's backend
///
/// Entries rebuilt from a listing carry no storage key metadata and are
/// never matched, so a bare key is not mistaken for a local path.
fn working_copy<'a>(entry: &'a CatalogEntry, storage: &dyn StorageBackend) -> Option<&'a Path> {
    if !entry.metadata.contains_key(META_STORAGE_KEY) || !entry.path.exists() {
        return None;
    }
    if storage.local_path(&entry.key).as_deref() == Some(entry.path.as_path()) {
        return None;
    }
    Some(&entry.path)
}

/// Point the outcome at the copy a local backend now holds
fn adopt_stored_copy(outcome: &mut BackupOutcome, working: &Path, stored: PathBuf) {
    let size = outcome.size().unwrap_or(0);
    outcome.replace_artifact(stored, size);
    match remove_path(working) {
        Ok(()) => debug!("Removed working copy {}", working.display()),
        Err(e) => warn!("Failed to remove working copy {}: {:#}", working.display(), e),
    }
}

/// Local path of the artifact, retrieving it into `scratch` for remote storage
fn fetch_artifact(entry: &CatalogEntry, storage: &dyn StorageBackend, scratch: &Path) -> OrchestratorResult<PathBuf> {
    let fault = |message: String| OrchestratorError::StorageFault {
        storage: entry.storage.clone(),
        message,
    };

    if storage.kind() == StorageKind::Local {
        let path = storage
            .local_path(&entry.key)
            .filter(|p| p.exists())
            .unwrap_or_else(|| entry.path.clone());
        if !path.exists() {
            return Err(fault(format!("Artifact not found: {}", path.display())));
        }
        return Ok(path);
    }

    // The push never happened; the artifact only exists where it was written
    if entry.metadata.get("storage_push").map(String::as_str) == Some("failed") && entry.path.exists() {
        return Ok(entry.path.clone());
    }

    let file_name = entry.key.rsplit('/').next().unwrap_or(&entry.key);
    let local = scratch.join(file_name);
    info!("Retrieving {} from '{}'", entry.key, entry.storage);
    match storage.retrieve(&entry.key, &local) {
        Ok(true) => Ok(local),
        Ok(false) => Err(fault(format!("{} not found", entry.key))),
        Err(e) => Err(fault(format!("{:#}", e))),
    }
}

/// Where the compressed artifact goes: next to the raw one, named after the request
fn compressed_target(raw: &Path, name: &str, at: DateTime<Utc>, kind: CompressionType) -> PathBuf {
    let dir = raw.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = artifact_stem(name, at);
    let file_name = match kind {
        CompressionType::Zip => format!("{}.zip", stem),
        CompressionType::Gzip if raw.is_dir() => format!("{}.tar.gz", stem),
        CompressionType::Gzip => match raw.extension() {
            Some(ext) => format!("{}.{}.gz", stem, ext.to_string_lossy()),
            None => format!("{}.gz", stem),
        },
    };
    dir.join(file_name)
}

/// Remove entries that appeared in `dir` since `before` and carry `name`
fn cleanup_partial(dir: &Path, before: &std::collections::BTreeSet<PathBuf>, name: &str) {
    for path in dir_entries(dir).difference(before) {
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(name))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        match remove_path(path) {
            Ok(()) => debug!("Removed partial output {}", path.display()),
            Err(e) => warn!("Failed to remove partial output {}: {:#}", path.display(), e),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "adapter panicked".to_string()
    }
}
