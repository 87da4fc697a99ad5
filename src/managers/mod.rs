pub mod archive;
pub mod backup;
pub mod catalog;
pub mod logging;
pub mod notification;
pub mod retention;

pub use archive::ArchiveCoordinator;
pub use backup::{BackupOrchestrator, OrchestratorBuilder, LOCAL_STORAGE};
pub use catalog::{Catalog, CatalogEntry, StorageUsage};
pub use notification::{BackupEvent, NotificationSink, WebhookNotifier};
pub use retention::{RetentionAction, RetentionReport};
