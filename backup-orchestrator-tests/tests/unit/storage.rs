//! Unit tests for storage backends

use backup_orchestrator::models::BackupType;
use backup_orchestrator::storage::{
    key_backup_type, storage_key, ListingEntry, LocalStorage, RcloneStorage, StorageBackend,
    StorageKind,
};
use chrono::Duration;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use test_utils::{create_sample_tree, tree_files, ListingShape, MockExecutor, MockResponse, MockStorage, TestContext};

#[test]
fn test_storage_key_uses_type_and_file_name() {
    assert_eq!(
        storage_key(BackupType::Database, Path::new("/srv/backups/database/shop.sql.gz")),
        "database/shop.sql.gz"
    );
    assert_eq!(key_backup_type("filesystem/site.zip"), BackupType::Filesystem);
    assert_eq!(key_backup_type("misc/whatever"), BackupType::Custom);
}

#[test]
fn test_local_storage_directory_round_trip() {
    let ctx = TestContext::new();
    let source = ctx.create_subdir("site_2025-01-01_00-00-00");
    create_sample_tree(&source).unwrap();
    let storage = LocalStorage::new("archive", ctx.create_subdir("archive"));

    let key = "filesystem/site_2025-01-01_00-00-00";
    assert!(storage.store(&source, key).unwrap());
    assert_eq!(storage.kind(), StorageKind::Local);
    assert_eq!(storage.local_path(key), Some(ctx.temp_dir().join("archive").join(key)));

    let back = ctx.temp_dir().join("back");
    assert!(storage.retrieve(key, &back).unwrap());
    assert_eq!(tree_files(&back), tree_files(&source));
}

#[test]
fn test_local_storage_lists_backups() {
    let ctx = TestContext::new();
    let root = ctx.create_subdir("archive");
    fs::create_dir_all(root.join("database")).unwrap();
    fs::write(root.join("database").join("shop_2025-01-01_00-00-00.sql.gz"), "x").unwrap();
    fs::write(root.join("database").join(".partial"), "hidden").unwrap();
    let storage = LocalStorage::new("archive", &root);

    let entries = storage.list("database").unwrap();
    assert_eq!(entries.len(), 1);
    match &entries[0] {
        ListingEntry::Local(local) => {
            assert_eq!(local.name, "shop");
            assert_eq!(local.backup_type, BackupType::Database);
            assert_eq!(local.storage, "archive");
            assert_eq!(local.file_size, 1);
        }
        other => panic!("expected a local listing, got {:?}", other),
    }

    // Missing prefix lists empty
    assert!(storage.list("filesystem").unwrap().is_empty());
}

#[test]
fn test_local_storage_rejects_escaping_keys() {
    let ctx = TestContext::new();
    let storage = LocalStorage::new("archive", ctx.create_subdir("archive"));
    let file = ctx.create_file("x.sql", "x");

    assert!(storage.store(&file, "../outside.sql").is_err());
    assert!(storage.delete("/").is_err());
}

#[test]
fn test_rclone_store_then_list() {
    let ctx = TestContext::new();
    let file = ctx.create_file("shop.sql.gz", "x");
    let executor = MockExecutor::new();
    let storage = RcloneStorage::new("offsite", "s3:bucket/backups", Arc::new(executor.clone()));

    assert!(storage.store(&file, "database/shop.sql.gz").unwrap());
    let call = &executor.calls_to("rclone")[0];
    assert!(call.has_arg("copyto"));
    assert!(call.has_arg("s3:bucket/backups/database/shop.sql.gz"));
}

#[test]
fn test_rclone_failure_surfaces_as_error() {
    let ctx = TestContext::new();
    let file = ctx.create_file("shop.sql.gz", "x");
    let executor = MockExecutor::new().expect(
        "rclone",
        MockResponse::Failure {
            stderr: "Failed to copy: AccessDenied".to_string(),
            exit_code: 1,
        },
    );
    let storage = RcloneStorage::new("offsite", "s3:bucket", Arc::new(executor));

    assert!(storage.store(&file, "database/shop.sql.gz").is_err());
}

#[test]
fn test_mock_storage_listing_shapes() {
    let remote = MockStorage::new("s3").with_object("database/a_2025-01-01_00-00-00.sql", Duration::days(2));
    let local = MockStorage::local("disk").with_object("database/a_2025-01-01_00-00-00.sql", Duration::days(2));
    let forced = MockStorage::local("disk2")
        .with_shape(ListingShape::Remote)
        .with_object_at("database/b.sql", None);

    assert!(matches!(remote.list("database").unwrap()[0], ListingEntry::Remote(_)));
    assert!(matches!(local.list("database").unwrap()[0], ListingEntry::Local(_)));
    assert!(forced.list("database").unwrap()[0].timestamp().is_none());
    assert_eq!(remote.list_calls(), vec!["database".to_string()]);
}
