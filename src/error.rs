use thiserror::Error;

/// Failures raised by the orchestrator
///
/// Everything except [`OrchestratorError::BackupNotFound`] is turned into a
/// failed outcome (backup) or `false` (restore) before it reaches a caller.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No adapter found for backup type '{backup_type}'")]
    NoAdapterFound { backup_type: String },

    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Adapter '{adapter}' failed: {message}")]
    AdapterFault { adapter: String, message: String },

    #[error("Compression failed: {0}")]
    CompressionFault(#[from] ArchiveError),

    #[error("Failed to push artifact to storage '{storage}': {message}")]
    StoragePushFault { storage: String, message: String },

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Storage backend '{0}' is not registered")]
    UnknownStorage(String),

    #[error("Storage '{storage}' failed: {message}")]
    StorageFault { storage: String, message: String },

    #[error("{0}")]
    Locked(String),

    #[error("Invalid orchestrator setup: {0}")]
    Setup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Short machine-readable kind, recorded in failed outcome metadata
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NoAdapterFound { .. } => "no_adapter_found",
            OrchestratorError::ValidationFailed(_) => "validation_failed",
            OrchestratorError::AdapterFault { .. } => "adapter_fault",
            OrchestratorError::CompressionFault(_) => "compression_fault",
            OrchestratorError::StoragePushFault { .. } => "storage_push_fault",
            OrchestratorError::BackupNotFound(_) => "backup_not_found",
            OrchestratorError::UnknownStorage(_) => "unknown_storage",
            OrchestratorError::StorageFault { .. } => "storage_fault",
            OrchestratorError::Locked(_) => "locked",
            OrchestratorError::Setup(_) => "setup",
            OrchestratorError::Io(_) => "io",
        }
    }

    /// Message placed in a failed outcome
    ///
    /// Adapter faults carry the adapter's own message verbatim.
    pub fn outcome_message(&self) -> String {
        match self {
            OrchestratorError::AdapterFault { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Failures raised by the archive coordinator and codecs
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Unsupported compression type: {0}")]
    UnsupportedCompression(String),

    #[error("Compression adapter not available for type: {0}")]
    CompressionAdapterUnavailable(String),

    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] anyhow::Error),
}
