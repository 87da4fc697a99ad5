//! Tests for the restore workflow

use backup_orchestrator::adapters::FilesystemAdapter;
use backup_orchestrator::utils::OperationLock;
use std::fs;
use test_utils::{
    tree_files, BackupRequest, BackupScript, BackupType, MockStorage, NotifyEvent, OrchestratorError,
    RecordingSink, RestoreOptions, RestoreScript, ResultAssertions, RetentionPolicy, ScriptedAdapter,
    TestContext,
};

fn no_retention() -> RetentionPolicy {
    RetentionPolicy {
        database_days: 0,
        filesystem_days: 0,
    }
}

#[test]
fn test_restore_uncompressed_local_backup() {
    let ctx = TestContext::new();
    let adapter = ScriptedAdapter::database("scripted").with_backup(BackupScript::Dump(b"CREATE TABLE a;".to_vec()));
    let sink = RecordingSink::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .sink(sink.clone())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));
    assert!(outcome.is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    let restored = orchestrator.restore(&id, &RestoreOptions::default()).assert_ok();

    assert!(restored);
    let calls = adapter.restores();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].content.as_deref(), Some(&b"CREATE TABLE a;"[..]));
    assert_eq!(
        sink.kinds(),
        vec![
            NotifyEvent::PreBackup,
            NotifyEvent::PostBackup,
            NotifyEvent::PreRestore,
            NotifyEvent::PostRestore,
        ]
    );
    // The artifact itself is untouched
    assert!(outcome.path().unwrap().exists());
}

#[test]
fn test_restore_decompresses_into_scratch_space() {
    let ctx = TestContext::new();
    let adapter = ScriptedAdapter::database("scripted").with_backup(BackupScript::Dump(b"SELECT 1;".to_vec()));
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .default_compression("gzip")
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));
    assert!(outcome.is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    assert!(orchestrator.restore(&id, &RestoreOptions::default()).assert_ok());

    let call = &adapter.restores()[0];
    assert!(!call.is_dir);
    assert_eq!(call.content.as_deref(), Some(&b"SELECT 1;"[..]));
    assert!(call.artifact.to_string_lossy().ends_with(".sql"));
    // Scratch space is gone, the compressed artifact is still there
    assert!(!call.artifact.exists());
    assert!(outcome.path().unwrap().exists());
}

#[test]
fn test_restore_unpacks_directory_archives() {
    let ctx = TestContext::new();
    let adapter = ScriptedAdapter::database("scripted").with_backup(BackupScript::DumpDirectory);
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .default_compression("gzip")
        .build()
        .assert_ok();

    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "warehouse")).is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    assert!(orchestrator.restore(&id, &RestoreOptions::default()).assert_ok());

    let call = &adapter.restores()[0];
    assert!(call.is_dir);
    assert_eq!(call.files, vec!["nested/data.csv".to_string(), "schema.sql".to_string()]);
}

#[test]
fn test_restore_retrieves_from_remote_storage() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3");
    let adapter = ScriptedAdapter::database("scripted").with_backup(BackupScript::Dump(b"remote dump".to_vec()));
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .storage(s3.clone())
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(
        BackupRequest::new(BackupType::Database, "shop")
            .with_storage("s3")
            .with_compression("zip"),
    );
    assert!(outcome.is_success());
    // Only the remote copy is left
    fs::remove_file(outcome.path().unwrap()).unwrap();

    let entry = orchestrator.get_last(None).unwrap().clone();
    assert!(orchestrator.restore(&entry.id, &RestoreOptions::default()).assert_ok());

    assert_eq!(s3.retrieve_calls(), vec![entry.key.clone()]);
    let call = &adapter.restores()[0];
    assert!(call.is_dir);
    assert_eq!(call.files.len(), 1);
    assert!(call.files[0].ends_with(".sql"));
}

#[test]
fn test_failed_retrieve_reports_false() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3").failing_retrieve();
    let adapter = ScriptedAdapter::database("scripted");
    let sink = RecordingSink::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .storage(s3.clone())
        .sink(sink.clone())
        .retention(no_retention())
        .build()
        .assert_ok();

    assert!(orchestrator
        .backup(BackupRequest::new(BackupType::Database, "shop").with_storage("s3"))
        .is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    let restored = orchestrator.restore(&id, &RestoreOptions::default()).assert_ok();

    assert!(!restored);
    assert!(adapter.restores().is_empty());
    let last = sink.events().pop().unwrap();
    assert_eq!(last.kind, NotifyEvent::RestoreFailed);
    assert!(last.error.unwrap().contains("mock retrieve failure"));
}

#[test]
fn test_unpushed_artifact_restores_from_where_it_was_written() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("s3").rejecting_store();
    let adapter = ScriptedAdapter::database("scripted");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .storage(s3.clone())
        .default_storage("s3")
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "shop"));
    assert!(outcome.is_success());
    assert_eq!(outcome.metadata().get("storage_push").map(String::as_str), Some("failed"));
    let id = orchestrator.get_last(None).unwrap().id.clone();

    assert!(orchestrator.restore(&id, &RestoreOptions::default()).assert_ok());
    assert!(s3.retrieve_calls().is_empty());
}

#[test]
fn test_adapter_refusal_and_error_report_false() {
    let ctx = TestContext::new();
    let refusing = ScriptedAdapter::database("scripted").with_restore(RestoreScript::Refuse);
    let sink = RecordingSink::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(refusing.clone())
        .sink(sink.clone())
        .build()
        .assert_ok();
    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "shop")).is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    assert!(!orchestrator.restore(&id, &RestoreOptions::default()).assert_ok());
    assert_eq!(sink.kinds().last(), Some(&NotifyEvent::RestoreFailed));

    let ctx = TestContext::new();
    let erroring = ScriptedAdapter::database("scripted").with_restore(RestoreScript::Error);
    let mut orchestrator = ctx.orchestrator().adapter(erroring).build().assert_ok();
    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "shop")).is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    assert!(!orchestrator.restore(&id, &RestoreOptions::default()).assert_ok());
}

#[test]
fn test_unknown_id_is_an_error() {
    let ctx = TestContext::new();
    let sink = RecordingSink::new();
    let orchestrator = ctx
        .orchestrator()
        .adapter(ScriptedAdapter::database("scripted"))
        .sink(sink.clone())
        .build()
        .assert_ok();

    let result = orchestrator.restore("00000000-0000-0000-0000-000000000000", &RestoreOptions::default());

    assert!(matches!(result, Err(OrchestratorError::BackupNotFound(_))));
    assert!(sink.events().is_empty());
}

#[test]
fn test_held_restore_lock_reports_false() {
    let ctx = TestContext::new();
    let lock_dir = ctx.create_subdir("locks");
    let adapter = ScriptedAdapter::database("scripted");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter.clone())
        .lock_dir(&lock_dir)
        .build()
        .assert_ok();
    assert!(orchestrator.backup(BackupRequest::new(BackupType::Database, "shop")).is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    let mut held = OperationLock::open(&lock_dir, &format!("restore-{}", id)).unwrap();
    let _guard = held.try_acquire().unwrap();

    assert!(!orchestrator.restore(&id, &RestoreOptions::default()).assert_ok());
    assert!(adapter.restores().is_empty());
}

#[test]
fn test_filesystem_round_trip() {
    let ctx = TestContext::new();
    let source = ctx.create_source_tree("site");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(FilesystemAdapter::new())
        .retention(no_retention())
        .build()
        .assert_ok();

    let outcome = orchestrator.backup(
        BackupRequest::new(BackupType::Filesystem, "site")
            .with_path(&source)
            .with_exclude("excluded")
            .with_compression("zip"),
    );
    assert!(outcome.is_success(), "{:?}", outcome.error());
    let id = orchestrator.get_last(Some(BackupType::Filesystem)).unwrap().id.clone();

    let target = ctx.temp_dir().join("restored");
    let options = RestoreOptions {
        target: Some(target.clone()),
        ..RestoreOptions::default()
    };
    assert!(orchestrator.restore(&id, &options).assert_ok());

    assert_eq!(
        tree_files(&target),
        vec!["app.conf", "cache.tmp", "data/nested/deep.txt", "data/records.txt"]
    );
    assert_eq!(
        fs::read_to_string(target.join("data").join("records.txt")).unwrap(),
        "alpha\nbeta\n"
    );
}

#[test]
fn test_filesystem_restore_keeps_existing_data_aside() {
    let ctx = TestContext::new();
    let source = ctx.create_source_tree("site");
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(FilesystemAdapter::new())
        .retention(no_retention())
        .build()
        .assert_ok();

    assert!(orchestrator
        .backup(BackupRequest::new(BackupType::Filesystem, "site").with_path(&source))
        .is_success());
    let id = orchestrator.get_last(None).unwrap().id.clone();

    let target = ctx.create_subdir("live");
    fs::write(target.join("current.txt"), "live data").unwrap();
    let options = RestoreOptions {
        target: Some(target.clone()),
        backup_existing: true,
        ..RestoreOptions::default()
    };
    assert!(orchestrator.restore(&id, &options).assert_ok());

    assert!(!target.join("current.txt").exists());
    assert!(target.join("app.conf").exists());
    let aside: Vec<_> = ctx
        .entries(ctx.temp_dir())
        .into_iter()
        .filter(|n| n.starts_with("live.pre-restore-"))
        .collect();
    assert_eq!(aside.len(), 1);
}
