//! PostgreSQL adapter built on `pg_dump`, `pg_restore` and `psql`

use super::{
    dump_failed, locate_dump, passthrough_flags, validate_database_request, ConnectionHandle,
    DatabaseConnection, SourceAdapter,
};
use crate::models::{
    artifact_stem, artifact_timestamp, BackupOutcome, BackupRequest, BackupType, PostgresFormat,
    RestoreOptions,
};
use crate::utils::fs::path_size;
use crate::utils::{CommandExecutor, ToolEnv, DEFAULT_COMMAND_TIMEOUT};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

pub struct PostgresAdapter {
    connection: DatabaseConnection,
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
    safety_dir: Option<PathBuf>,
}

impl PostgresAdapter {
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

    fn env(&self) -> ToolEnv {
        let mut env = ToolEnv::new();
        if let Some(password) = &self.connection.password {
            env.add("PGPASSWORD", password);
        }
        env
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.connection.host),
            format!("--port={}", self.connection.port()),
        ];
        if let Some(user) = &self.connection.username {
            args.push(format!("--username={}", user));
        }
        args.push("--no-password".to_string());
        args
    }

    fn dump(&self, request: &BackupRequest, dump: &Path) -> Result<()> {
        let opts = &request.options.postgres;
        let mut args = self.connection_args();
        args.push(format!("--format={}", opts.format.flag()));
        if opts.clean && opts.format == PostgresFormat::Plain {
            args.push("--clean".to_string());
            args.push("--if-exists".to_string());
        }
        if opts.no_owner {
            args.push("--no-owner".to_string());
        }
        for table in &request.exclude {
            args.push(format!("--exclude-table={}", table));
        }
        args.extend(passthrough_flags(&request.options.extra));
        args.push(format!("--file={}", dump.display()));
        args.push(self.connection.database.clone());

        self.executor
            .run("pg_dump", &args, &self.env(), self.timeout)
            .map(|_| ())
    }

    fn safety_dump(&self) -> Result<()> {
        let dir = match &self.safety_dir {
            Some(dir) => dir,
            None => anyhow::bail!("No directory configured for pre-restore safety dumps"),
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}_pre-restore_{}.dump",
            self.connection.database,
            artifact_timestamp(Utc::now())
        ));
        info!("Taking safety dump of '{}' to {}", self.connection.database, path.display());

        let request = BackupRequest::new(BackupType::Database, &self.connection.database);
        self.dump(&request, &path)
            .context("Pre-restore safety dump failed")
    }
}

impl SourceAdapter for PostgresAdapter {
    fn name(&self) -> &str {
        "postgres"
    }

    fn supports(&self, backup_type: &str) -> bool {
        matches!(backup_type, "database" | "postgres" | "postgresql" | "pgsql")
    }

    fn validate(&self, request: &BackupRequest) -> Vec<String> {
        validate_database_request(request, &self.connection)
    }

    fn backup(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        let started = Instant::now();
        let output = request.output_dir().context("Output path is required")?;
        let format = request.options.postgres.format;
        let dump = output.join(format!(
            "{}.{}",
            artifact_stem(&request.name, Utc::now()),
            format.extension()
        ));

        info!(
            "Dumping PostgreSQL database '{}' from {} to {}",
            self.connection.database,
            self.connection.host,
            dump.display()
        );

        if let Err(e) = self.dump(request, &dump) {
            return Ok(dump_failed("pg_dump", &dump, &e));
        }
        if !dump.exists() {
            return Ok(BackupOutcome::failed("pg_dump produced no output file"));
        }

        Ok(BackupOutcome::succeeded(&dump, path_size(&dump)?)
            .with_duration(started.elapsed().as_secs_f64())
            .with_metadata("platform", "postgres")
            .with_metadata("format", format.extension())
            .with_metadata("database", self.connection.database.clone())
            .with_metadata("connection", self.connection.name.clone()))
    }

    fn restore(&self, artifact: &Path, options: &RestoreOptions) -> Result<bool> {
        let dump = locate_dump(artifact, &["dump", "sql", "tar"])?;

        if options.backup_existing {
            self.safety_dump()?;
        }

        let plain = dump
            .extension()
            .map(|e| e.eq_ignore_ascii_case("sql"))
            .unwrap_or(false);

        let mut args = self.connection_args();
        let program = if plain {
            args.push(format!("--dbname={}", self.connection.database));
            args.push("--set=ON_ERROR_STOP=1".to_string());
            args.push(format!("--file={}", dump.display()));
            "psql"
        } else {
            args.push(format!("--dbname={}", self.connection.database));
            args.push("--clean".to_string());
            args.push("--if-exists".to_string());
            args.push("--no-owner".to_string());
            args.push(dump.display().to_string());
            "pg_restore"
        };

        info!(
            "Restoring PostgreSQL database '{}' from {} with {}",
            self.connection.database,
            dump.display(),
            program
        );
        match self.executor.run(program, &args, &self.env(), self.timeout) {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("{} failed: {:#}", program, e);
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
