//! Configuration module for backup-orchestrator
//!
//! This module handles loading and validating configuration from TOML files.
//!
//! ## Layout
//!
//! - `[global]`: base directory, defaults, timeouts, locks and logging
//! - `[retention]`: maximum age per backup type
//! - `[storage.<name>]`: storage backends (`local` or `rclone`)
//! - `[connections.<name>]`: database servers
//! - `[filesystem]`: default paths and exclusions for filesystem backups
//! - `[notifications]`: webhook settings
//!
//! ## Example Usage
//!
//! ```no_run
//! use backup_orchestrator::config;
//!
//! let config = config::load_config("backup-orchestrator.toml")?;
//! for (name, storage) in &config.storage {
//!     println!("Storage: {} -> {:?}", name, storage);
//! }
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{
    load_config, parse_config, resolve_connection, resolve_connections, ConfigError, Result,
};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
