//! Test utilities for backup-orchestrator
//!
//! This crate provides shared test utilities, scripted adapters and
//! helper functions for testing the backup orchestrator.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{MockStorage, ScriptedAdapter, TestContext};
//!
//! #[test]
//! fn my_test() {
//!     let ctx = TestContext::new();
//!     let mut orchestrator = ctx
//!         .orchestrator()
//!         .adapter(ScriptedAdapter::database("scripted"))
//!         .build()
//!         .unwrap();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{OptionAssertions, ResultAssertions, TestContext};

// Re-export types from the main crate for convenience
pub use backup_orchestrator::config::{
    Config, GlobalConfig, NotificationConfig, NotifyEvent, RetentionPolicy, StorageConfig,
};
pub use backup_orchestrator::models::{BackupOutcome, BackupRequest, BackupType, RestoreOptions};
pub use backup_orchestrator::{BackupOrchestrator, OrchestratorError};

// Re-export mock implementations from the main crate
pub use backup_orchestrator::managers::notification::mock::{RecordedEvent, RecordingSink};
pub use backup_orchestrator::storage::mock::{ListingShape, MockStorage};
pub use backup_orchestrator::storage::StorageBackend;
pub use backup_orchestrator::utils::executor::mock::{MockExecutor, MockResponse};
pub use backup_orchestrator::utils::executor::CommandExecutor;

