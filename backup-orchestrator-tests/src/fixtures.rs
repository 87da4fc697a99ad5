//! Test fixtures and scripted adapters
//!
//! [`ScriptedAdapter`] stands in for a real source adapter: it writes a
//! small artifact (or fails in a chosen way) and records what it was asked
//! to restore.

use anyhow::Result;
use backup_orchestrator::adapters::{ConnectionHandle, DatabasePlatform, SourceAdapter};
use backup_orchestrator::models::{artifact_stem, BackupOutcome, BackupRequest, RestoreOptions};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// What a [`ScriptedAdapter`] does when asked for a backup
#[derive(Debug, Clone)]
pub enum BackupScript {
    /// Write `{stem}.sql` with this content
    Dump(Vec<u8>),
    /// Write a `{stem}/` directory with a couple of files
    DumpDirectory,
    /// Write a partial `{name}.sql`, then report a failed outcome
    FailedOutcome(String),
    /// Write a partial `{name}.sql`, then return an error
    Error(String),
    /// Write a partial `{name}.sql`, then panic
    Panic(String),
}

/// What a [`ScriptedAdapter`] does when asked to restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreScript {
    Succeed,
    /// Return `Ok(false)`
    Refuse,
    Error,
}

/// One restore the adapter saw, captured before the scratch space goes away
#[derive(Debug, Clone)]
pub struct RestoreCall {
    pub artifact: PathBuf,
    pub is_dir: bool,
    /// File content when the artifact was a file
    pub content: Option<Vec<u8>>,
    /// Sorted relative file names when the artifact was a directory
    pub files: Vec<String>,
    pub force: bool,
}

#[derive(Debug)]
struct ScriptState {
    backup: BackupScript,
    restore: RestoreScript,
    validation_errors: Vec<String>,
    backups: Vec<String>,
    restores: Vec<RestoreCall>,
}

/// Adapter driven by a script; clones share state
#[derive(Clone)]
pub struct ScriptedAdapter {
    name: String,
    types: Vec<String>,
    connection: Option<ConnectionHandle>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedAdapter {
    fn with_types(name: &str, types: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
            connection: None,
            state: Arc::new(Mutex::new(ScriptState {
                backup: BackupScript::Dump(b"-- scripted dump\n".to_vec()),
                restore: RestoreScript::Succeed,
                validation_errors: Vec::new(),
                backups: Vec::new(),
                restores: Vec::new(),
            })),
        }
    }

    /// Connection-free adapter for `database`
    pub fn database(name: &str) -> Self {
        Self::with_types(name, &["database"])
    }

    /// Connection-free adapter for `filesystem`
    pub fn filesystem(name: &str) -> Self {
        Self::with_types(name, &["filesystem"])
    }

    /// Adapter for `database` bound to a named connection
    pub fn bound(name: &str, connection: &str, platform: DatabasePlatform) -> Self {
        Self {
            connection: Some(ConnectionHandle {
                name: connection.to_string(),
                platform,
            }),
            ..Self::with_types(name, &["database"])
        }
    }

    pub fn with_backup(self, script: BackupScript) -> Self {
        self.update(|s| s.backup = script)
    }

    pub fn with_restore(self, script: RestoreScript) -> Self {
        self.update(|s| s.restore = script)
    }

    pub fn with_validation_error(self, message: &str) -> Self {
        self.update(|s| s.validation_errors.push(message.to_string()))
    }

    /// Names of every backup request the adapter ran
    pub fn backups(&self) -> Vec<String> {
        self.state.lock().map(|s| s.backups.clone()).unwrap_or_default()
    }

    pub fn restores(&self) -> Vec<RestoreCall> {
        self.state.lock().map(|s| s.restores.clone()).unwrap_or_default()
    }

    fn update(self, f: impl FnOnce(&mut ScriptState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
        self
    }

    fn script(&self) -> BackupScript {
        self.state
            .lock()
            .map(|s| s.backup.clone())
            .unwrap_or(BackupScript::Error("state poisoned".to_string()))
    }
}

fn write_partial(output: &Path, name: &str) -> Result<()> {
    fs::write(output.join(format!("{}.sql", name)), b"-- partial")?;
    Ok(())
}

fn list_files(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else if let Ok(relative) = path.strip_prefix(root) {
                    out.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    let mut files = Vec::new();
    walk(root, root, &mut files);
    files.sort();
    files
}

impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, backup_type: &str) -> bool {
        self.types.iter().any(|t| t == backup_type)
    }

    fn validate(&self, _request: &BackupRequest) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.validation_errors.clone())
            .unwrap_or_default()
    }

    fn backup(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        if let Ok(mut state) = self.state.lock() {
            state.backups.push(request.name.clone());
        }

        let output = request
            .output_dir()
            .ok_or_else(|| anyhow::anyhow!("Output path is required"))?;
        let stem = artifact_stem(&request.name, Utc::now());

        match self.script() {
            BackupScript::Dump(content) => {
                let path = output.join(format!("{}.sql", stem));
                fs::write(&path, &content)?;
                Ok(BackupOutcome::succeeded(&path, content.len() as u64))
            }
            BackupScript::DumpDirectory => {
                let dir = output.join(&stem);
                fs::create_dir_all(dir.join("nested"))?;
                fs::write(dir.join("schema.sql"), b"CREATE TABLE t (id int);")?;
                fs::write(dir.join("nested").join("data.csv"), b"1\n2\n3\n")?;
                Ok(BackupOutcome::succeeded(&dir, 30))
            }
            BackupScript::FailedOutcome(message) => {
                write_partial(output, &request.name)?;
                Ok(BackupOutcome::failed(message))
            }
            BackupScript::Error(message) => {
                write_partial(output, &request.name)?;
                anyhow::bail!(message)
            }
            BackupScript::Panic(message) => {
                write_partial(output, &request.name)?;
                panic!("{}", message)
            }
        }
    }

    fn restore(&self, artifact: &Path, options: &RestoreOptions) -> Result<bool> {
        let call = RestoreCall {
            artifact: artifact.to_path_buf(),
            is_dir: artifact.is_dir(),
            content: if artifact.is_file() {
                fs::read(artifact).ok()
            } else {
                None
            },
            files: if artifact.is_dir() {
                list_files(artifact)
            } else {
                Vec::new()
            },
            force: options.force,
        };

        let script = match self.state.lock() {
            Ok(mut state) => {
                state.restores.push(call);
                state.restore
            }
            Err(_) => RestoreScript::Error,
        };

        match script {
            RestoreScript::Succeed => Ok(true),
            RestoreScript::Refuse => Ok(false),
            RestoreScript::Error => anyhow::bail!("scripted restore failure"),
        }
    }

    fn requires_connection(&self) -> bool {
        self.connection.is_some()
    }

    fn connection(&self) -> Option<ConnectionHandle> {
        self.connection.clone()
    }
}

/// Adapter that leaves `{name}.sql` behind and then fails with "Disk full"
pub fn failing_adapter(name: &str) -> ScriptedAdapter {
    ScriptedAdapter::database(name).with_backup(BackupScript::Error("Disk full".to_string()))
}

/// Populate `root` with a small tree:
///
/// ```text
/// app.conf
/// data/records.txt
/// data/nested/deep.txt
/// excluded/secret.txt
/// cache.tmp
/// ```
pub fn create_sample_tree(root: &Path) -> Result<()> {
    fs::create_dir_all(root.join("data").join("nested"))?;
    fs::create_dir_all(root.join("excluded"))?;
    fs::write(root.join("app.conf"), "listen = 8080\n")?;
    fs::write(root.join("data").join("records.txt"), "alpha\nbeta\n")?;
    fs::write(root.join("data").join("nested").join("deep.txt"), "deep\n")?;
    fs::write(root.join("excluded").join("secret.txt"), "do not copy\n")?;
    fs::write(root.join("cache.tmp"), "scratch\n")?;
    Ok(())
}

/// Sorted relative paths of every file below `root`
pub fn tree_files(root: &Path) -> Vec<String> {
    list_files(root)
}

/// Minimal valid config TOML; `{base_dir}` is replaced by the caller
pub fn minimal_config_toml() -> &'static str {
    r#"
[global]
base_dir = "{base_dir}"
"#
}

/// Config with an rclone remote, two connections and webhook settings
pub fn full_config_toml() -> &'static str {
    r#"
[global]
base_dir = "{base_dir}"
default_storage = "offsite"
default_connection = "main"
default_compression = "gzip"
command_timeout_seconds = 120
lock_directory = "{base_dir}/locks"
log_directory = "{base_dir}/logs"
log_level = "debug"

[retention]
database_days = 7
filesystem_days = 0

[storage.offsite]
type = "rclone"
remote = "s3:bucket/backups"

[storage.archive]
type = "local"
path = "{base_dir}/archive"

[connections.main]
platform = "postgres"
host = "db.internal"
username = "backup"
password = "secret"
database = "shop"

[connections.legacy]
platform = "mysql"
database = "legacy"

[filesystem]
default_paths = ["/srv/www"]
default_excludes = ["*.tmp"]

[notifications]
webhook_url = "https://discord.com/api/webhooks/test"
notify_on = ["backup_failed", "post_backup"]
rate_limit_minutes = 30
"#
}

/// Fill `{base_dir}` placeholders in a template
pub fn render(template: &str, base_dir: &Path) -> String {
    template.replace("{base_dir}", &base_dir.display().to_string().replace('\\', "/"))
}
