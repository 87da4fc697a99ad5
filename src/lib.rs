//! Backup Orchestrator Library
//!
//! Source adapters produce backup artifacts from databases and directories,
//! codecs compress them, storage backends keep them, and the orchestrator
//! ties the workflow together with a catalog and a retention sweep.

pub mod adapters;
pub mod codecs;
pub mod config;
pub mod error;
pub mod managers;
pub mod models;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use error::{ArchiveError, OrchestratorError};
pub use managers::backup::BackupOrchestrator;
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use models::{BackupOutcome, BackupRequest, BackupType, RestoreOptions};
