use super::expand_tilde;
use super::types::*;
use crate::adapters::DatabaseConnection;
use crate::codecs::CompressionType;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage '{0}' not found")]
    StorageNotFound(String),

    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse, expand `~` in paths and validate configuration text
pub fn parse_config(contents: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(contents)?;
    expand_paths(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn expand_paths(config: &mut Config) {
    let global = &mut config.global;
    global.base_dir = expand_tilde(&global.base_dir);
    global.lock_directory = expand_tilde(&global.lock_directory);
    global.log_directory = expand_tilde(&global.log_directory);

    for storage in config.storage.values_mut() {
        match storage {
            StorageConfig::Local { path } => *path = expand_tilde(path),
            StorageConfig::Rclone { config_file, .. } => {
                if let Some(file) = config_file {
                    *file = expand_tilde(file);
                }
            }
        }
    }

    for connection in config.connections.values_mut() {
        if let Some(file) = &mut connection.password_file {
            *file = expand_tilde(file);
        }
    }

    for path in &mut config.filesystem.default_paths {
        *path = expand_tilde(path);
    }

    config.notifications.cache_file = expand_tilde(&config.notifications.cache_file);
}

/// Validate the configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.global.base_dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "global.base_dir must not be empty".to_string(),
        ));
    }

    // `local` is implicit: a LocalStorage rooted at base_dir
    let default_storage = &config.global.default_storage;
    if default_storage != "local" && !config.storage.contains_key(default_storage) {
        return Err(ConfigError::StorageNotFound(default_storage.clone()));
    }

    if let Some(ref name) = config.global.default_connection {
        if !config.connections.contains_key(name) {
            return Err(ConfigError::ConnectionNotFound(name.clone()));
        }
    }

    if let Some(ref codec) = config.global.default_compression {
        if codec.parse::<CompressionType>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Unsupported default_compression '{}' (expected zip or gzip)",
                codec
            )));
        }
    }

    if config.global.command_timeout_seconds == 0 {
        return Err(ConfigError::ValidationError(
            "global.command_timeout_seconds must be greater than zero".to_string(),
        ));
    }

    for (name, storage) in &config.storage {
        if let StorageConfig::Rclone { remote, .. } = storage {
            if !remote.contains(':') {
                return Err(ConfigError::ValidationError(format!(
                    "Storage '{}': rclone remote must look like 'name:path', got '{}'",
                    name, remote
                )));
            }
        }
    }

    for (name, connection) in &config.connections {
        validate_connection(name, connection)?;
    }

    Ok(())
}

fn validate_connection(name: &str, connection: &ConnectionConfig) -> Result<()> {
    if connection.database.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Connection '{}': database must not be empty",
            name
        )));
    }

    if connection.password.is_some() && connection.password_file.is_some() {
        return Err(ConfigError::ValidationError(format!(
            "Connection '{}': set either password or password_file, not both",
            name
        )));
    }

    if let Some(ref file) = connection.password_file {
        if !file.exists() {
            return Err(ConfigError::ValidationError(format!(
                "Connection '{}': password file does not exist: {:?}",
                name, file
            )));
        }
    }

    Ok(())
}

/// Turn a configured connection into the settings adapters use
pub fn resolve_connection(name: &str, connection: &ConnectionConfig) -> Result<DatabaseConnection> {
    let password = match (&connection.password, &connection.password_file) {
        (Some(password), _) => Some(password.clone()),
        (None, Some(file)) => Some(fs::read_to_string(file)?.trim().to_string()),
        (None, None) => None,
    };

    Ok(DatabaseConnection {
        name: name.to_string(),
        platform: connection.platform,
        host: connection.host.clone(),
        port: connection.port,
        username: connection.username.clone(),
        password,
        database: connection.database.clone(),
    })
}

/// Resolve every configured connection
pub fn resolve_connections(config: &Config) -> Result<Vec<DatabaseConnection>> {
    config
        .connections
        .iter()
        .map(|(name, connection)| resolve_connection(name, connection))
        .collect()
}
