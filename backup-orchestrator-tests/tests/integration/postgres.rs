//! PostgreSQL backup and restore against a real server
//!
//! The container publishes 5432 on a fixed host port so the host's
//! `pg_dump`/`pg_restore` can reach it.

use super::common::{is_docker_available, wait_until, ContainerGuard};
use anyhow::Result;
use backup_orchestrator::adapters::{DatabaseConnection, DatabasePlatform, PostgresAdapter};
use backup_orchestrator::utils::{tool_available, RealExecutor};
use serial_test::serial;
use std::process::Command;
use std::sync::Arc;
use test_utils::{BackupRequest, BackupType, OptionAssertions, RestoreOptions, TestContext};

const CONTAINER: &str = "backup-orchestrator-test-postgres";
const HOST_PORT: u16 = 55432;

fn prerequisites_met() -> bool {
    if !is_docker_available() {
        eprintln!("Docker not available, skipping test");
        return false;
    }
    if !tool_available("pg_dump") || !tool_available("pg_restore") {
        eprintln!("pg_dump/pg_restore not installed, skipping test");
        return false;
    }
    true
}

fn start_postgres() -> Result<ContainerGuard> {
    let guard = ContainerGuard::new(CONTAINER);
    let port = format!("{}:5432", HOST_PORT);
    let output = Command::new("docker")
        .args([
            "run",
            "-d",
            "--name",
            CONTAINER,
            "-p",
            &port,
            "-e",
            "POSTGRES_PASSWORD=testpass",
            "-e",
            "POSTGRES_DB=testdb",
            "postgres:15-alpine",
        ])
        .output()?;
    if !output.status.success() {
        anyhow::bail!(
            "docker run failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    wait_until(60, || {
        Command::new("docker")
            .args(["exec", CONTAINER, "pg_isready", "-U", "postgres", "-d", "testdb"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })?;
    Ok(guard)
}

fn exec_sql(container: &str, sql: &str) -> Result<String> {
    let output = Command::new("docker")
        .args(["exec", container, "psql", "-U", "postgres", "-d", "testdb", "-t", "-c", sql])
        .output()?;
    if !output.status.success() {
        anyhow::bail!("psql failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn row_count(container: &str) -> Result<i64> {
    let result = exec_sql(container, "SELECT COUNT(*) FROM orders")?;
    result
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("Failed to parse count '{}': {}", result, e))
}

fn connection() -> DatabaseConnection {
    let mut conn = DatabaseConnection::new("main", DatabasePlatform::Postgres, "testdb");
    conn.port = Some(HOST_PORT);
    conn.username = Some("postgres".to_string());
    conn.password = Some("testpass".to_string());
    conn
}

#[test]
#[ignore]
#[serial]
fn test_postgres_backup_and_restore() -> Result<()> {
    if !prerequisites_met() {
        return Ok(());
    }
    let container = start_postgres()?;

    exec_sql(container.name(), "CREATE TABLE orders (id SERIAL PRIMARY KEY, item TEXT)")?;
    exec_sql(container.name(), "INSERT INTO orders (item) VALUES ('lamp'), ('desk'), ('chair')")?;
    assert_eq!(row_count(container.name())?, 3);

    let ctx = TestContext::new();
    let adapter = PostgresAdapter::new(connection(), Arc::new(RealExecutor::new()));
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(adapter)
        .default_connection("main")
        .default_compression("gzip")
        .build()?;

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "testdb"));
    assert!(outcome.is_success(), "backup failed: {:?}", outcome.error());
    assert!(outcome.path().unwrap().to_string_lossy().ends_with(".dump.gz"));

    exec_sql(container.name(), "DELETE FROM orders WHERE item = 'desk'")?;
    assert_eq!(row_count(container.name())?, 2);

    let id = orchestrator.get_last(Some(BackupType::Database)).assert_some().id.clone();
    assert!(orchestrator.restore(&id, &RestoreOptions::default())?);
    assert_eq!(row_count(container.name())?, 3);

    Ok(())
}

#[test]
#[ignore]
#[serial]
fn test_postgres_backup_of_missing_database_fails_cleanly() -> Result<()> {
    if !prerequisites_met() {
        return Ok(());
    }
    let _container = start_postgres()?;

    let mut conn = connection();
    conn.database = "does_not_exist".to_string();
    let ctx = TestContext::new();
    let mut orchestrator = ctx
        .orchestrator()
        .adapter(PostgresAdapter::new(conn, Arc::new(RealExecutor::new())))
        .default_connection("main")
        .build()?;

    let outcome = orchestrator.backup(BackupRequest::new(BackupType::Database, "ghost"));
    assert!(!outcome.is_success());
    assert!(ctx.entries(&ctx.base_dir().join("database")).is_empty());
    assert!(orchestrator.list(None).is_empty());

    Ok(())
}
