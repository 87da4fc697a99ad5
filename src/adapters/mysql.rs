//! MySQL / MariaDB adapter built on `mysqldump` and `mysql`

use super::{
    dump_failed, locate_dump, passthrough_flags, validate_database_request, ConnectionHandle,
    DatabaseConnection, SourceAdapter,
};
use crate::models::{
    artifact_stem, artifact_timestamp, BackupOutcome, BackupRequest, BackupType, RestoreOptions,
};
use crate::utils::fs::path_size;
use crate::utils::{CommandExecutor, ToolEnv, DEFAULT_COMMAND_TIMEOUT};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

pub struct MySqlAdapter {
    connection: DatabaseConnection,
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
    safety_dir: Option<PathBuf>,
}

impl MySqlAdapter {
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

    /// Where pre-restore safety dumps go
    pub fn with_safety_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.safety_dir = Some(dir.into());
        self
    }

    fn env(&self) -> ToolEnv {
        let mut env = ToolEnv::new();
        if let Some(password) = &self.connection.password {
            env.add("MYSQL_PWD", password);
        }
        env
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.connection.host),
            format!("--port={}", self.connection.port()),
        ];
        if let Some(user) = &self.connection.username {
            args.push(format!("--user={}", user));
        }
        args
    }

    fn dump_args(&self, request: &BackupRequest, dump: &Path) -> Vec<String> {
        let opts = &request.options.mysql;
        let mut args = self.connection_args();

        if opts.single_transaction {
            args.push("--single-transaction".to_string());
        }
        if opts.routines {
            args.push("--routines".to_string());
        }
        if opts.triggers {
            args.push("--triggers".to_string());
        } else {
            args.push("--skip-triggers".to_string());
        }
        if opts.add_drop_table {
            args.push("--add-drop-table".to_string());
        } else {
            args.push("--skip-add-drop-table".to_string());
        }
        for table in &request.exclude {
            args.push(format!("--ignore-table={}.{}", self.connection.database, table));
        }
        args.extend(passthrough_flags(&request.options.extra));
        args.push(format!("--result-file={}", dump.display()));
        args.push(self.connection.database.clone());
        args
    }

    fn dump(&self, request: &BackupRequest, dump: &Path) -> Result<()> {
        let args = self.dump_args(request, dump);
        self.executor
            .run("mysqldump", &args, &self.env(), self.timeout)
            .map(|_| ())
    }

    fn safety_dump(&self) -> Result<()> {
        let dir = match &self.safety_dir {
            Some(dir) => dir,
            None => anyhow::bail!("No directory configured for pre-restore safety dumps"),
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}_pre-restore_{}.sql",
            self.connection.database,
            artifact_timestamp(Utc::now())
        ));
        info!("Taking safety dump of '{}' to {}", self.connection.database, path.display());

        let request = BackupRequest::new(BackupType::Database, &self.connection.database);
        self.dump(&request, &path)
            .context("Pre-restore safety dump failed")
    }
}

impl SourceAdapter for MySqlAdapter {
    fn name(&self) -> &str {
        "mysql"
    }

    fn supports(&self, backup_type: &str) -> bool {
        matches!(backup_type, "database" | "mysql" | "mariadb")
    }

    fn validate(&self, request: &BackupRequest) -> Vec<String> {
        validate_database_request(request, &self.connection)
    }

    fn backup(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        let started = Instant::now();
        let output = request.output_dir().context("Output path is required")?;
        let dump = output.join(format!("{}.sql", artifact_stem(&request.name, Utc::now())));

        info!(
            "Dumping MySQL database '{}' from {} to {}",
            self.connection.database,
            self.connection.host,
            dump.display()
        );

        if let Err(e) = self.dump(request, &dump) {
            return Ok(dump_failed("mysqldump", &dump, &e));
        }
        if !dump.exists() {
            return Ok(BackupOutcome::failed("mysqldump produced no output file"));
        }

        Ok(BackupOutcome::succeeded(&dump, path_size(&dump)?)
            .with_duration(started.elapsed().as_secs_f64())
            .with_metadata("platform", "mysql")
            .with_metadata("database", self.connection.database.clone())
            .with_metadata("connection", self.connection.name.clone()))
    }

    fn restore(&self, artifact: &Path, options: &RestoreOptions) -> Result<bool> {
        let dump = locate_dump(artifact, &["sql"])?;

        if options.backup_existing {
            self.safety_dump()?;
        }

        let mut args = self.connection_args();
        args.push(self.connection.database.clone());
        args.push("-e".to_string());
        args.push(format!("source {}", dump.display()));

        info!("Restoring MySQL database '{}' from {}", self.connection.database, dump.display());
        match self.executor.run("mysql", &args, &self.env(), self.timeout) {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("mysql restore failed: {:#}", e);
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
