//! Tests for the backup workflow

use backup_orchestrator::adapters::FilesystemAdapter;
use backup_orchestrator::storage::LocalStorage;
use backup_orchestrator::utils::OperationLock;
use std::fs;
use test_utils::{
    failing_adapter, tree_files, BackupRequest, BackupScript, BackupType, MockStorage,
    NotifyEvent, RecordingSink, ResultAssertions, RetentionPolicy, ScriptedAdapter, TestContext,
};

fn no_retention() -> RetentionPolicy {
    RetentionPolicy {
        database_days: 0,
        filesystem_days: 0,
    }
}

#[test]
fn test_database_backup_to_default_storage() {
    let ctx = TestContext::new();
    let adapter = ScriptedAdapter::database("scripted");
    let sink = RecordingSink::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .sink(sink.clone())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));

    assert!(outcome.is_success(), "{:?}", outcome.error());
    let path = outcome.path().unwrap();
    assert!(path.exists());
    assert!(path.starts_with(ctx.base_dir().join("database")));
    assert_eq!(outcome.metadata().get("storage").map(String::as_str), Some("local"));
    assert_eq!(outcome.metadata().get("adapter").map(String::as_str), Some("scripted"));
    assert!(outcome.duration_secs().is_some());

    assert_eq!(adapter.backups(), vec!["shop".to_string()]);
    assert_eq!(sink.kinds(), vec![NotifyEvent::PreBackup, NotifyEvent::PostBackup]);

    let last = orchestrator.get_last(Some(BackupType::Database)).unwrap();
    assert_eq!(last.name, "shop");
    assert_eq!(last.storage, "local");
    assert_eq!(orchestrator.list(None).len(), 1);
}

#[test]
fn test_gzip_compression_replaces_raw_artifact() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop").with_compression("gzip"));

    assert!(outcome.is_success(), "{:?}", outcome.error());
    let path = outcome.path().unwrap();
    assert!(path.to_string_lossy().ends_with(".sql.gz"));
    assert_eq!(outcome.metadata().get("compression").map(String::as_str), Some("gzip"));
    assert!(outcome.metadata().contains_key("original_size"));

    // Only the compressed artifact remains
    let names = ctx.entries(&ctx.base_dir().join("database"));
    assert_eq!(names.len(), 1, "{:?}", names);
    assert!(names[0].ends_with(".sql.gz"));
}

#[test]
fn test_default_compression_applies_to_directories() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted").with_backup(BackupScript::DumpDirectory))
        .default_compression("gzip")
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "warehouse"));

    assert!(outcome.is_success(), "{:?}", outcome.error());
    assert!(outcome.path().unwrap().to_string_lossy().ends_with(".tar.gz"));
    let names = ctx.entries(&ctx.base_dir().join("database"));
    assert_eq!(names.len(), 1, "{:?}", names);
}

#[test]
fn test_unknown_codec_fails_and_leaves_nothing() {
    let ctx = TestContext::new();
    let sink = RecordingSink::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .sink(sink.clone())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop").with_compression("rar"));

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.metadata().get("error_kind").map(String::as_str),
        Some("compression_fault")
    );
    assert!(ctx.entries(&ctx.base_dir().join("database")).is_empty());
    assert!(orchestrator.list(None).is_empty());
    assert_eq!(sink.kinds(), vec![NotifyEvent::PreBackup, NotifyEvent::BackupFailed]);
}

#[test]
fn test_push_to_remote_storage() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .storage(s3.clone())
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(
        BackupRequest::new(BackupType::Database, "shop")
            .with_storage("s3")
            .with_compression("zip"),
    );

    assert!(outcome.is_success(), "{:?}", outcome.error());
    let key = outcome.metadata().get("storage_key").cloned().unwrap();
    assert!(key.starts_with("database/shop_"));
    assert!(key.ends_with(".zip"));
    assert_eq!(s3.store_calls(), vec![key.clone()]);
    assert!(s3.contains(&key));

    let entry = orchestrator.get_last(None).unwrap();
    assert_eq!(entry.storage, "s3");
    assert_eq!(entry.key, key);
}

#[test]
fn test_local_default_storage_outside_base_dir_holds_the_artifact() {
    let ctx = TestContext::new();
    let disk_root = ctx.create_subdir("disk");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .storage(LocalStorage::new("disk", &disk_root))
        .default_storage("disk")
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));

    assert!(outcome.is_success(), "{:?}", outcome.error());
    assert_eq!(outcome.metadata().get("storage").map(String::as_str), Some("disk"));
    let path = outcome.path().unwrap();
    assert!(path.starts_with(disk_root.join("database")));
    assert_eq!(fs::read(path).unwrap(), b"-- scripted dump\n");
    assert!(ctx.entries(&ctx.base_dir().join("database")).is_empty());

    // A fresh listing finds the same backup under the same id
    let id = orchestrator.get_last(None).unwrap().id.clone();
    assert_eq!(orchestrator.refresh_catalog(), 1);
    let entry = orchestrator.get(&id).unwrap();
    assert_eq!(entry.storage, "disk");
    assert_eq!(entry.path, path);
}

#[test]
fn test_rejected_push_still_succeeds_on_default_storage() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3").rejecting_store();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .storage(s3.clone())
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop").with_storage("s3"));

    assert!(outcome.is_success(), "{:?}", outcome.error());
    assert_eq!(outcome.metadata().get("storage").map(String::as_str), Some("local"));
    assert_eq!(outcome.metadata().get("storage_push").map(String::as_str), Some("failed"));
    assert_eq!(s3.store_calls().len(), 1);
    assert!(s3.keys().is_empty());
    assert!(outcome.path().unwrap().exists());
    assert_eq!(orchestrator.get_last(None).unwrap().storage, "local");
}

#[test]
fn test_failing_push_still_succeeds() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .storage(MockStorage::new("s3").failing_store())
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop").with_storage("s3"));

    assert!(outcome.is_success());
    assert_eq!(outcome.metadata().get("storage_push").map(String::as_str), Some("failed"));
}

#[test]
fn test_adapter_error_cleans_partial_output() {
    let ctx = TestContext::new();
    let sink = RecordingSink::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(failing_adapter("scripted"))
        .sink(sink.clone())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));

    assert!(!outcome.is_success());
    assert_eq!(outcome.error(), Some("Disk full"));
    assert_eq!(outcome.metadata().get("error_kind").map(String::as_str), Some("adapter_fault"));
    assert!(!ctx.base_dir().join("database").join("shop.sql").exists());
    assert!(orchestrator.list(None).is_empty());

    let events = sink.events();
    assert_eq!(events.last().unwrap().kind, NotifyEvent::BackupFailed);
    assert_eq!(events.last().unwrap().error.as_deref(), Some("Disk full"));
}

#[test]
fn test_adapter_panic_becomes_failed_outcome() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted").with_backup(BackupScript::Panic("dump exploded".to_string())))
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));

    assert!(!outcome.is_success());
    assert_eq!(outcome.error(), Some("dump exploded"));
    assert!(!ctx.base_dir().join("database").join("shop.sql").exists());
}

#[test]
fn test_failed_outcome_cleans_partial_output() {
    let ctx = TestContext::new();
    let output = ctx.create_subdir("out");
    std::fs::write(output.join("unrelated.sql"), "keep me").unwrap();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(
            ScriptedAdapter::database("scripted")
                .with_backup(BackupScript::FailedOutcome("mysqldump exited with 2".to_string())),
        )
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop").with_output_path(&output));

    assert!(!outcome.is_success());
    assert_eq!(outcome.error(), Some("mysqldump exited with 2"));
    assert_eq!(ctx.entries(&output), vec!["unrelated.sql".to_string()]);
}

#[test]
fn test_validation_errors_stop_the_adapter() {
    let ctx = TestContext::new();
    let adapter = ScriptedAdapter::database("scripted").with_validation_error("Backup name is required");
    let mut orchestrator = ctx.orchestrator().adapter(adapter.clone()).build().assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));

    assert!(!outcome.is_success());
    assert!(outcome.error().unwrap().contains("Backup name is required"));
    assert_eq!(
        outcome.metadata().get("error_kind").map(String::as_str),
        Some("validation_failed")
    );
    assert!(adapter.backups().is_empty());
}

#[test]
fn test_unknown_storage_is_a_failed_outcome() {
    let ctx = TestContext::new();
    let adapter = ScriptedAdapter::database("scripted");
    let mut orchestrator = ctx.orchestrator().adapter(adapter.clone()).build().assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop").with_storage("tape"));

    assert!(!outcome.is_success());
    assert_eq!(outcome.metadata().get("error_kind").map(String::as_str), Some("unknown_storage"));
    assert!(adapter.backups().is_empty());
}

#[test]
fn test_failing_sink_does_not_affect_backup() {
    let ctx = TestContext::new();
    let sink = RecordingSink::failing();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .sink(sink.clone())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));

    assert!(outcome.is_success());
    assert_eq!(sink.kinds(), vec![NotifyEvent::PreBackup, NotifyEvent::PostBackup]);
}

#[test]
fn test_held_lock_fails_the_backup() {
    let ctx = TestContext::new();
    let lock_dir = ctx.create_subdir("locks");
    let adapter = ScriptedAdapter::database("scripted");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .lock_dir(&lock_dir)
        .build()
        .assert_ok();

    let mut held = OperationLock::open(&lock_dir, "database-shop").unwrap();
    let guard = held.try_acquire().unwrap();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));
    assert!(!outcome.is_success());
    assert_eq!(outcome.metadata().get("error_kind").map(String::as_str), Some("locked"));
    assert!(adapter.backups().is_empty());

    // A different name is not blocked
    let other = orchestrator.backup(BackupRequest::new(BackupType::Database, "crm"));
    assert!(other.is_success(), "{:?}", other.error());

    drop(guard);
    let retry = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));
    assert!(retry.is_success(), "{:?}", retry.error());
}

#[test]
fn test_filesystem_backup_honours_exclusions() {
    let ctx = TestContext::new();
    let source = ctx.create_source_tree("site");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(FilesystemAdapter::new().with_default_excludes(vec!["*.tmp".to_string()]))
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(
        BackupRequest::new(BackupType::Filesystem, "site")
            .with_path(&source)
            .with_exclude("excluded"),
    );

    assert!(outcome.is_success(), "{:?}", outcome.error());
    let artifact = outcome.path().unwrap();
    assert!(artifact.is_dir());
    assert_eq!(
        tree_files(artifact),
        vec!["app.conf", "data/nested/deep.txt", "data/records.txt"]
    );
    assert_eq!(outcome.metadata().get("files").map(String::as_str), Some("3"));
}

#[test]
fn test_filesystem_backup_of_multiple_sources() {
    let ctx = TestContext::new();
    let www = ctx.create_source_tree("www");
    let etc = ctx.create_subdir("etc");
    fs::write(etc.join("hosts"), "127.0.0.1 localhost\n").unwrap();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(FilesystemAdapter::new())
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(
        BackupRequest::new(BackupType::Filesystem, "server")
            .with_path(&www)
            .with_path(&etc)
            .with_compression("zip"),
    );

    assert!(outcome.is_success(), "{:?}", outcome.error());
    assert!(outcome.path().unwrap().to_string_lossy().ends_with(".zip"));
}

#[test]
fn test_filesystem_backup_rejects_missing_paths() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx.orchestrator().adapter(FilesystemAdapter::new()).build().assert_ok();

    let outcome = orchestrator.backup(
        BackupRequest::new(BackupType::Filesystem, "site").with_path(ctx.temp_dir().join("missing")),
    );

    assert!(!outcome.is_success());
    assert!(outcome.error().unwrap().contains("Path does not exist"));
}
