//! Tests for listing, lookup, deletion and catalog refresh

use backup_orchestrator::models::catalog_id;
use chrono::Duration;
use test_utils::{
    BackupRequest, BackupScript, BackupType, MockStorage, OptionAssertions, OrchestratorError,
    ResultAssertions, RetentionPolicy, ScriptedAdapter, TestContext,
};

fn no_retention() -> RetentionPolicy {
    RetentionPolicy {
        database_days: 0,
        filesystem_days: 0,
    }
}

#[test]
fn test_list_filters_by_type_newest_first() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db"))
        .adapter(ScriptedAdapter::filesystem("files").with_backup(BackupScript::DumpDirectory))
        .retention(no_retention())
        .build()
        .assert_ok();

    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "first")).is_success());
    assert!(orchestrator.backup(BackupRequest::new(BackupType::Filesystem, "site")).is_success());
    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "second")).is_success());

    let all: Vec<_> = orchestrator.list(None).into_iter().map(|e| e.name.clone()).collect();
    assert_eq!(all, vec!["second", "site", "first"]);

    let databases: Vec<_> = orchestrator
        .list(Some(BackupType::Database))
        .into_iter()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(databases, vec!["second", "first"]);

    assert_eq!(orchestrator.get_last(Some(BackupType::Filesystem)).assert_some().name, "site");
    assert!(orchestrator.get_last(Some(BackupType::Custom)).is_none());
}

#[test]
fn test_ids_are_derived_from_storage_and_key() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db"))
        .build()
        .assert_ok();

    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "shop")).is_success());
    let entry = orchestrator.get_last(None).assert_some().clone();

    assert_eq!(entry.id, catalog_id(&entry.storage, &entry.key));
    assert_eq!(orchestrator.get(&entry.id).assert_some().key, entry.key);
    assert!(orchestrator.get("not-an-id").is_none());
}

#[test]
fn test_storage_usage_sums_catalog_sizes() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db").with_backup(BackupScript::Dump(vec![b'x'; 100])))
        .adapter(ScriptedAdapter::filesystem("files").with_backup(BackupScript::DumpDirectory))
        .retention(no_retention())
        .build()
        .assert_ok();

    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "a")).is_success());
    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "b")).is_success());
    assert!(orchestrator.backup(BackupRequest::new(BackupType::Filesystem, "c")).is_success());

    let usage = orchestrator.storage_usage();
    assert_eq!(usage.count, 3);
    assert_eq!(usage.by_type.get(&BackupType::Database), Some(&200));
    assert_eq!(usage.by_type.get(&BackupType::Filesystem), Some(&30));
    assert_eq!(usage.total, 230);
}

#[test]
fn test_delete_removes_artifact_and_entry() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db"))
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));
    let id = orchestrator.get_last(None).assert_some().id.clone();

    assert!(orchestrator.delete(&id).assert_ok());
    assert!(!outcome.path().unwrap().exists());
    assert!(orchestrator.get(&id).is_none());
    assert!(matches!(orchestrator.delete(&id), Err(OrchestratorError::BackupNotFound(_))));
}

#[test]
fn test_delete_only_touches_the_entry_backend() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3");
    let gcs = MockStorage::new("gcs");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db"))
        .storage(s3.clone())
        .storage(gcs.clone())
        .retention(no_retention())
        .build()
        .assert_ok();

    assert!(orchestrator
        .backup(BackupRequest::new(BackupType::Database, "shop").with_storage("s3"))
        .is_success());
    let entry = orchestrator.get_last(None).assert_some().clone();
    assert!(entry.path.exists(), "working copy stays after the push");

    assert!(orchestrator.delete(&entry.id).assert_ok());
    assert_eq!(s3.delete_calls(), vec![entry.key.clone()]);
    assert!(gcs.delete_calls().is_empty());
    assert!(!entry.path.exists());

    // Nothing comes back under the implicit local storage
    assert_eq!(orchestrator.refresh_catalog(), 0);
}

#[test]
fn test_failed_delete_keeps_the_entry() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3").failing_delete();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db"))
        .storage(s3.clone())
        .retention(no_retention())
        .build()
        .assert_ok();

    assert!(orchestrator
        .backup(BackupRequest::new(BackupType::Database, "shop").with_storage("s3"))
        .is_success());
    let id = orchestrator.get_last(None).assert_some().id.clone();

    assert!(!orchestrator.delete(&id).assert_ok());
    assert!(orchestrator.get(&id).is_some());
}

#[test]
fn test_refresh_discovers_backups_from_other_runs() {
    let ctx = TestContext::new();
    {
        let mut writer = ctx
            .orchestrator()
            .adapter(ScriptedAdapter::database("db"))
            .build()
            .assert_ok();
        assert!(writer.backup(BackupRequest::new(BackupType::Database, "shop")).is_success());
        assert!(writer.backup(BackupRequest::new(BackupType::Database, "crm")).is_success());
    }

    let s3 = MockStorage::new("s3").with_object("filesystem/site_2025-01-01_00-00-00.zip", Duration::days(1));
    let mut reader = ctx.orchestrator().storage(s3).build().assert_ok();
    assert!(reader.list(None).is_empty(), "catalog starts empty");

    assert_eq!(reader.refresh_catalog(), 3);
    assert!(reader.catalog().refreshed_at().is_some());

    let names: Vec<_> = reader
        .list(Some(BackupType::Database))
        .into_iter()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"shop".to_string()));
    assert!(names.contains(&"crm".to_string()));

    let remote = reader.get_last(Some(BackupType::Filesystem)).assert_some();
    assert_eq!(remote.name, "site");
    assert_eq!(remote.storage, "s3");
    assert_eq!(remote.id, catalog_id("s3", "filesystem/site_2025-01-01_00-00-00.zip"));
}

#[test]
fn test_refresh_keeps_ids_and_metadata() {
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db"))
        .build()
        .assert_ok();

    assert!(orchestrator
        .backup(BackupRequest::new(BackupType::Database, "shop").with_compression("gzip"))
        .is_success());
    let before = orchestrator.get_last(None).assert_some().clone();

    orchestrator.refresh_catalog();

    let after = orchestrator.get(&before.id).assert_some();
    assert_eq!(after.key, before.key);
    assert_eq!(after.metadata.get("compression").map(String::as_str), Some("gzip"));
}

#[test]
fn test_refresh_keeps_entries_of_unlistable_backends() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3").failing_list();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("db"))
        .storage(s3)
        .retention(no_retention())
        .build()
        .assert_ok();

    assert!(orchestrator
        .backup(BackupRequest::new(BackupType::Database, "shop").with_storage("s3"))
        .is_success());
    let id = orchestrator.get_last(None).assert_some().id.clone();

    orchestrator.refresh_catalog();
    assert!(orchestrator.get(&id).is_some());
}
