//! SQL Server adapter driving T-SQL `BACKUP`/`RESTORE` through `sqlcmd`

use super::{
    locate_dump, validate_database_request, ConnectionHandle, DatabaseConnection, SourceAdapter,
};
use crate::models::{
    artifact_stem, artifact_timestamp, BackupOutcome, BackupRequest, RestoreOptions,
    SqlServerOptions,
};
use crate::utils::fs::{path_size, remove_path};
use crate::utils::{CommandExecutor, ToolEnv, DEFAULT_COMMAND_TIMEOUT};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub struct SqlServerAdapter {
    connection: DatabaseConnection,
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
    safety_dir: Option<PathBuf>,
}

/// `[name]` with closing brackets doubled
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `N'text'` with single quotes doubled
fn quote_literal(text: &str) -> String {
    format!("N'{}'", text.replace('\'', "''"))
}

fn backup_statement(database: &str, disk: &Path, opts: &SqlServerOptions) -> String {
    let mut with = vec!["INIT"];
    if opts.copy_only {
        with.push("COPY_ONLY");
    }
    if opts.compression {
        with.push("COMPRESSION");
    }
    if opts.checksum {
        with.push("CHECKSUM");
    }
    format!(
        "BACKUP DATABASE {} TO DISK = {} WITH {}",
        quote_ident(database),
        quote_literal(&disk.to_string_lossy()),
        with.join(", ")
    )
}

fn restore_script(database: &str, disk: &Path, options: &RestoreOptions) -> String {
    let db = quote_ident(database);
    let mut statements = Vec::new();
    if options.single_user {
        statements.push(format!(
            "ALTER DATABASE {} SET SINGLE_USER WITH ROLLBACK IMMEDIATE",
            db
        ));
    }
    statements.push(format!(
        "RESTORE DATABASE {} FROM DISK = {} WITH REPLACE, {}",
        db,
        quote_literal(&disk.to_string_lossy()),
        if options.recovery { "RECOVERY" } else { "NORECOVERY" }
    ));
    // A database left RESTORING cannot change access mode
    if options.single_user && options.recovery {
        statements.push(format!("ALTER DATABASE {} SET MULTI_USER", db));
    }
    statements.join("; ")
}

impl SqlServerAdapter {
    pub fn new(connection: DatabaseConnection, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            connection,
            executor,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            safety_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_safety_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.safety_dir = Some(dir.into());
        self
    }

    fn sqlcmd(&self, database: &str, query: String) -> Result<()> {
        let mut args = vec![
            "-S".to_string(),
            format!("{},{}", self.connection.host, self.connection.port()),
        ];
        let mut env = ToolEnv::new();
        match &self.connection.username {
            Some(user) => {
                args.push("-U".to_string());
                args.push(user.clone());
                if let Some(password) = &self.connection.password {
                    env.add("SQLCMDPASSWORD", password);
                }
            }
            None => args.push("-E".to_string()),
        }
        args.extend([
            "-d".to_string(),
            database.to_string(),
            "-b".to_string(),
            "-Q".to_string(),
            query,
        ]);

        self.executor
            .run("sqlcmd", &args, &env, self.timeout)
            .map(|_| ())
    }

    fn safety_backup(&self) -> Result<()> {
        let dir = match &self.safety_dir {
            Some(dir) => dir,
            None => anyhow::bail!("No directory configured for pre-restore safety backups"),
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}_pre-restore_{}.bak",
            self.connection.database,
            artifact_timestamp(Utc::now())
        ));
        info!("Taking safety backup of '{}' to {}", self.connection.database, path.display());

        let statement = backup_statement(
            &self.connection.database,
            &path,
            &SqlServerOptions::default(),
        );
        self.sqlcmd("master", statement)
            .context("Pre-restore safety backup failed")
    }
}

impl SourceAdapter for SqlServerAdapter {
    fn name(&self) -> &str {
        "sqlserver"
    }

    fn supports(&self, backup_type: &str) -> bool {
        matches!(backup_type, "database" | "sqlserver" | "mssql")
    }

    fn validate(&self, request: &BackupRequest) -> Vec<String> {
        let mut errors = validate_database_request(request, &self.connection);
        if !request.exclude.is_empty() {
            errors.push("Table exclusions are not supported for SQL Server backups".to_string());
        }
        errors
    }

    fn backup(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        let started = Instant::now();
        let output = request.output_dir().context("Output path is required")?;
        let disk = output.join(format!("{}.bak", artifact_stem(&request.name, Utc::now())));
        let statement = backup_statement(&self.connection.database, &disk, &request.options.sqlserver);

        info!(
            "Backing up SQL Server database '{}' on {} to {}",
            self.connection.database,
            self.connection.host,
            disk.display()
        );

        if let Err(e) = self.sqlcmd("master", statement) {
            error!("sqlcmd backup failed: {:#}", e);
            if let Err(cleanup) = remove_path(&disk) {
                warn!("Failed to remove partial backup {}: {}", disk.display(), cleanup);
            }
            return Ok(BackupOutcome::failed(format!("sqlcmd failed: {:#}", e)));
        }

        // The server writes the file; it may live on another host
        let size = if disk.exists() { path_size(&disk)? } else { 0 };

        Ok(BackupOutcome::succeeded(&disk, size)
            .with_duration(started.elapsed().as_secs_f64())
            .with_metadata("platform", "sqlserver")
            .with_metadata("database", self.connection.database.clone())
            .with_metadata("connection", self.connection.name.clone())
            .with_metadata(
                "server_compression",
                request.options.sqlserver.compression.to_string(),
            ))
    }

    fn restore(&self, artifact: &Path, options: &RestoreOptions) -> Result<bool> {
        let disk = locate_dump(artifact, &["bak"])?;

        if options.backup_existing {
            self.safety_backup()?;
        }

        let script = restore_script(&self.connection.database, &disk, options);
        info!("Restoring SQL Server database '{}' from {}", self.connection.database, disk.display());

        match self.sqlcmd("master", script) {
            Ok(()) => Ok(true),
            Err(e) => {
                error!("sqlcmd restore failed: {:#}", e);
                Ok(false)
            }
        }
    }

    fn requires_connection(&self) -> bool {
        true
    }

    fn connection(&self) -> Option<ConnectionHandle> {
        Some(self.connection.handle())
    }
}
