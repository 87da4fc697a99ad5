//! Unit tests for configuration loading and validation

use backup_orchestrator::adapters::DatabasePlatform;
use backup_orchestrator::config::{load_config, parse_config, resolve_connections, ConfigError};
use backup_orchestrator::models::BackupType;
use test_utils::{full_config_toml, minimal_config_toml, render, ConfigBuilder, NotifyEvent, StorageConfig, TestContext};

#[test]
fn test_config_loading_valid() {
    let (path, _config, _temp_dir) = ConfigBuilder::with_archive_storage().write();

    let loaded = load_config(&path);
    assert!(loaded.is_ok(), "Config should load successfully: {:?}", loaded.err());
    assert!(loaded.unwrap().storage.contains_key("archive"));
}

#[test]
fn test_minimal_template_defaults() {
    let ctx = TestContext::new();
    let config = parse_config(&render(minimal_config_toml(), &ctx.base_dir())).unwrap();

    assert_eq!(config.global.default_storage, "local");
    assert!(config.global.default_compression.is_none());
    assert_eq!(config.retention.days_for(BackupType::Database), 30);
    assert_eq!(config.retention.days_for(BackupType::Filesystem), 14);
    assert!(config.notifications.webhook_url.is_empty());
}

#[test]
fn test_full_template() {
    let ctx = TestContext::new();
    let config = parse_config(&render(full_config_toml(), &ctx.base_dir())).unwrap();

    assert_eq!(config.global.default_storage, "offsite");
    assert_eq!(config.global.default_compression.as_deref(), Some("gzip"));
    assert_eq!(config.retention.days_for(BackupType::Filesystem), 0);
    assert!(matches!(config.storage.get("offsite"), Some(StorageConfig::Rclone { .. })));
    assert_eq!(
        config.notifications.notify_on,
        vec![NotifyEvent::BackupFailed, NotifyEvent::PostBackup]
    );

    let connections = resolve_connections(&config).unwrap();
    assert_eq!(connections.len(), 2);
    let main = connections.iter().find(|c| c.name == "main").unwrap();
    assert_eq!(main.platform, DatabasePlatform::Postgres);
    assert_eq!(main.port(), 5432);
    assert_eq!(main.password.as_deref(), Some("secret"));
}

#[test]
fn test_unknown_default_storage_is_rejected() {
    let toml = r#"
[global]
base_dir = "/srv/backups"
default_storage = "nowhere"
"#;
    assert!(matches!(parse_config(toml), Err(ConfigError::StorageNotFound(_))));
}

#[test]
fn test_unknown_default_connection_is_rejected() {
    let toml = r#"
[global]
base_dir = "/srv/backups"
default_connection = "ghost"
"#;
    assert!(matches!(parse_config(toml), Err(ConfigError::ConnectionNotFound(_))));
}

#[test]
fn test_bad_compression_is_rejected() {
    let toml = r#"
[global]
base_dir = "/srv/backups"
default_compression = "rar"
"#;
    assert!(matches!(parse_config(toml), Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_rclone_remote_needs_a_colon() {
    let toml = r#"
[global]
base_dir = "/srv/backups"

[storage.offsite]
type = "rclone"
remote = "bucket/backups"
"#;
    assert!(matches!(parse_config(toml), Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_password_file_is_read_and_trimmed() {
    let ctx = TestContext::new();
    let secret = ctx.create_file("db-password", "hunter2\n");
    let toml = format!(
        r#"
[global]
base_dir = "/srv/backups"

[connections.main]
platform = "mysql"
database = "shop"
password_file = "{}"
"#,
        secret.display().to_string().replace('\\', "/")
    );

    let config = parse_config(&toml).unwrap();
    let connections = resolve_connections(&config).unwrap();
    assert_eq!(connections[0].password.as_deref(), Some("hunter2"));
}

#[test]
fn test_password_and_password_file_conflict() {
    let ctx = TestContext::new();
    let secret = ctx.create_file("db-password", "x");
    let toml = format!(
        r#"
[global]
base_dir = "/srv/backups"

[connections.main]
platform = "mysql"
database = "shop"
password = "inline"
password_file = "{}"
"#,
        secret.display().to_string().replace('\\', "/")
    );
    assert!(matches!(parse_config(&toml), Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_missing_file_is_a_read_error() {
    let ctx = TestContext::new();
    assert!(matches!(
        load_config(ctx.temp_dir().join("missing.toml")),
        Err(ConfigError::ReadError(_))
    ));
}
