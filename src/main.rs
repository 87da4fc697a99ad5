use anyhow::{Context, Result};
use backup_orchestrator::config::{self, Config, StorageConfig};
use backup_orchestrator::managers::{logging, BackupOrchestrator, CatalogEntry, RetentionReport};
use backup_orchestrator::models::{BackupRequest, BackupType, RestoreOptions};
use backup_orchestrator::utils::tool_available;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "backup-orchestrator")]
#[command(about = "Database and filesystem backup orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "/etc/backup-orchestrator/config.toml")]
    config: PathBuf,

    /// Debug output on the console and full error chains
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a backup
    #[command(name = "backup:create")]
    Create {
        /// Backup type (database, filesystem, custom)
        #[arg(short = 't', long = "type", default_value = "database")]
        backup_type: String,

        /// Logical backup name (defaults to the type)
        #[arg(short, long)]
        name: Option<String>,

        /// Storage backend (defaults to global.default_storage)
        #[arg(short, long)]
        storage: Option<String>,

        /// Compression codec: zip or gzip
        #[arg(long)]
        compression: Option<String>,

        /// Output directory (defaults to {base_dir}/{type})
        #[arg(long)]
        output_path: Option<PathBuf>,

        /// Path to back up (can be used multiple times)
        #[arg(long = "path")]
        paths: Vec<PathBuf>,

        /// Table or path pattern to exclude (can be used multiple times)
        #[arg(long)]
        exclude: Vec<String>,

        /// Database connection to back up
        #[arg(long)]
        connection: Option<String>,
    },

    /// List known backups
    #[command(name = "backup:list")]
    List {
        /// Only backups of this type
        #[arg(short = 't', long = "type")]
        backup_type: Option<String>,

        /// Only backups held by this storage backend
        #[arg(short, long)]
        storage: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Restore a backup by id
    #[command(name = "backup:restore")]
    Restore {
        /// Backup id as shown by backup:list
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,

        /// Restore in single-user mode (SQL Server)
        #[arg(long)]
        single_user: bool,

        /// Bring the database online after restore
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        recovery: bool,

        /// Keep a copy of the current data before overwriting it
        #[arg(long)]
        backup_existing: bool,

        /// Restore target directory (filesystem backups)
        #[arg(long)]
        target: Option<PathBuf>,

        /// Database connection to restore into
        #[arg(long)]
        connection: Option<String>,
    },

    /// Delete backups older than the retention policy allows
    #[command(name = "pro:backup:purge")]
    Purge {
        /// database, filesystem or all
        #[arg(short = 't', long = "type", default_value = "all")]
        backup_type: String,

        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration file and check external tools
    #[command(name = "config:validate")]
    Validate,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            if verbose {
                eprintln!("Error: {:?}", e);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    if let Commands::Validate = cli.command {
        logging::init_console_logging(cli.verbose);
        return Ok(handle_validate(&config));
    }

    // Keep the guard alive so file output is flushed on exit
    let logging_config = logging::LoggingConfig::from_global(&config.global, cli.verbose);
    let _log_guard = logging::init_logging(&logging_config)?;

    let mut orchestrator = BackupOrchestrator::from_config(&config)?;

    match cli.command {
        Commands::Create {
            backup_type,
            name,
            storage,
            compression,
            output_path,
            paths,
            exclude,
            connection,
        } => {
            let backup_type: BackupType = backup_type.parse().map_err(anyhow::Error::msg)?;
            let name = name.unwrap_or_else(|| backup_type.to_string());

            let mut request = BackupRequest::new(backup_type, &name);
            request.storage = storage;
            request.compression = compression;
            request.output_path = output_path;
            request.options.paths = paths;
            request.exclude = exclude;
            request.connection = connection;

            println!("Creating {} backup '{}'...", backup_type, name);
            let outcome = orchestrator.backup(request);

            if outcome.is_success() {
                println!("✓ Backup completed successfully");
                if let Some(path) = outcome.path() {
                    println!("  Artifact: {}", path.display());
                }
                println!("  Size: {}", format_size(outcome.size().unwrap_or(0)));
                if let Some(secs) = outcome.duration_secs() {
                    println!("  Duration: {:.1}s", secs);
                }
                if let Some(storage) = outcome.metadata().get("storage") {
                    println!("  Storage: {}", storage);
                }
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("✗ Backup failed: {}", outcome.error().unwrap_or("unknown error"));
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::List {
            backup_type,
            storage,
            format,
        } => {
            let type_filter = parse_type_filter(backup_type.as_deref())?;
            orchestrator.refresh_catalog();

            let entries: Vec<&CatalogEntry> = orchestrator
                .list(type_filter)
                .into_iter()
                .filter(|e| storage.as_deref().map_or(true, |s| e.storage == s))
                .collect();

            match format {
                OutputFormat::Table => print_table(&entries),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Csv => print_csv(&entries),
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Restore {
            id,
            force,
            single_user,
            recovery,
            backup_existing,
            target,
            connection,
        } => {
            use dialoguer::Confirm;

            orchestrator.refresh_catalog();
            let entry = orchestrator
                .get(&id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Backup not found: {}", id))?;

            println!("=== Restore: {} ===\n", entry.name);
            println!("  Type:    {}", entry.backup_type);
            println!("  Storage: {}", entry.storage);
            println!("  Created: {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("  Size:    {}", format_size(entry.size));
            println!();

            if !force {
                let confirmed = Confirm::new()
                    .with_prompt("This will overwrite existing data. Continue?")
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Restore cancelled");
                    return Ok(ExitCode::SUCCESS);
                }
            }

            let options = RestoreOptions {
                connection,
                target,
                force,
                single_user,
                recovery,
                backup_existing,
            };

            if orchestrator.restore(&id, &options)? {
                println!("✓ Restore completed successfully");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("✗ Restore failed, see the log for details");
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::Purge {
            backup_type,
            dry_run,
        } => {
            let type_filter = match backup_type.to_lowercase().as_str() {
                "all" => None,
                "database" => Some(BackupType::Database),
                "filesystem" => Some(BackupType::Filesystem),
                other => {
                    eprintln!("Invalid type '{}': expected database, filesystem or all", other);
                    return Ok(ExitCode::from(2));
                }
            };

            if dry_run {
                println!("Dry run: nothing will be deleted");
            }
            let report = orchestrator.apply_retention(type_filter, dry_run);
            print_report(&report, dry_run);

            if report.has_failures() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Commands::Validate => Ok(handle_validate(&config)),
    }
}

fn handle_validate(config: &Config) -> ExitCode {
    println!("Configuration is valid!");
    println!("Base directory: {}", config.global.base_dir.display());
    let implicit_local = config.global.default_storage == "local" && !config.storage.contains_key("local");
    println!(
        "Storage backends: {}{}",
        config.storage.len(),
        if implicit_local { " (+ implicit local)" } else { "" }
    );
    println!("Connections: {}", config.connections.len());

    let mut tools: Vec<&str> = config
        .connections
        .values()
        .flat_map(|c| c.platform.tools().iter().copied())
        .collect();
    if config
        .storage
        .values()
        .any(|s| matches!(s, StorageConfig::Rclone { .. }))
    {
        tools.push("rclone");
    }
    tools.sort_unstable();
    tools.dedup();

    if !tools.is_empty() {
        println!("\nExternal tools:");
        for tool in tools {
            if tool_available(tool) {
                println!("  ✓ {}", tool);
            } else {
                println!("  ✗ {} (not found in PATH)", tool);
            }
        }
    }

    ExitCode::SUCCESS
}

fn parse_type_filter(value: Option<&str>) -> Result<Option<BackupType>> {
    match value {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("all") => Ok(None),
        Some(v) => Ok(Some(v.parse().map_err(anyhow::Error::msg)?)),
    }
}

fn print_table(entries: &[&CatalogEntry]) {
    if entries.is_empty() {
        println!("No backups found");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:<20}  {:<12}  {:>10}  {}",
        "ID", "TYPE", "NAME", "STORAGE", "SIZE", "CREATED"
    );
    for entry in entries {
        println!(
            "{:<36}  {:<10}  {:<20}  {:<12}  {:>10}  {}",
            entry.id,
            entry.backup_type,
            entry.name,
            entry.storage,
            format_size(entry.size),
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} backup(s)", entries.len());
}

fn print_csv(entries: &[&CatalogEntry]) {
    println!("id,type,name,storage,key,size,created_at");
    for entry in entries {
        println!(
            "{},{},{},{},{},{},{}",
            entry.id,
            entry.backup_type,
            csv_field(&entry.name),
            csv_field(&entry.storage),
            csv_field(&entry.key),
            entry.size,
            entry.created_at.to_rfc3339()
        );
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn print_report(report: &RetentionReport, dry_run: bool) {
    for t in &report.skipped_types {
        println!("Retention disabled for {} backups, skipped", t);
    }
    let actions = if dry_run { &report.would_delete } else { &report.deleted };
    for action in actions {
        let verb = if dry_run { "Would delete" } else { "Deleted" };
        println!(
            "  {} {} from '{}' ({})",
            verb,
            action.key,
            action.storage,
            action.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
    for action in &report.failed {
        eprintln!("  ✗ Failed to delete {} from '{}'", action.key, action.storage);
    }
    for error in &report.errors {
        eprintln!("  ✗ {}", error);
    }
    println!(
        "{} examined, {} {}",
        report.examined,
        actions.len(),
        if dry_run { "would be deleted" } else { "deleted" }
    );
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
