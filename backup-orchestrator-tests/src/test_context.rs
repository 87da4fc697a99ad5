//! Per-test scratch space and the orchestrator builder rooted in it

use crate::config_builder::ConfigBuilder;
use crate::fixtures::create_sample_tree;
use anyhow::Result;
use backup_orchestrator::config::Config;
use backup_orchestrator::managers::OrchestratorBuilder;
use backup_orchestrator::BackupOrchestrator;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Owns a temporary directory for the duration of one test
pub struct TestContext {
    temp_dir: TempDir,
    /// Set when the context was made from a [`ConfigBuilder`]
    config: Option<Config>,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            config: None,
        }
    }

    /// Adopt the builder's temp directory and configuration
    pub fn from_builder(builder: ConfigBuilder) -> Self {
        let (config, temp_dir) = builder.persist();
        Self {
            temp_dir,
            config: Some(config),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// `{temp}/backups`, or the configured base directory
    pub fn base_dir(&self) -> PathBuf {
        match &self.config {
            Some(config) => config.global.base_dir.clone(),
            None => self.temp_dir.path().join("backups"),
        }
    }

    /// Orchestrator builder rooted at [`TestContext::base_dir`], no file locking
    pub fn orchestrator(&self) -> OrchestratorBuilder {
        BackupOrchestrator::builder().base_dir(self.base_dir())
    }

    /// Full stack built from the context's configuration
    pub fn orchestrator_from_config(&self) -> Result<BackupOrchestrator> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Test context has no configuration"))?;
        BackupOrchestrator::from_config(config)
    }

    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Write `content` to `name` below the temp dir, creating parents
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// The sample source tree under `name`
    pub fn create_source_tree(&self, name: &str) -> PathBuf {
        let path = self.create_subdir(name);
        create_sample_tree(&path).expect("Failed to create sample tree");
        path
    }

    /// Names directly inside `dir`, sorted; empty if it is missing
    pub fn entries(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unwrapping helpers with readable panic messages
pub trait ResultAssertions<T> {
    fn assert_ok(self) -> T;

    /// Panics unless the error's debug form contains `needle`
    fn assert_err_contains(self, needle: &str);
}

impl<T, E: std::fmt::Debug> ResultAssertions<T> for std::result::Result<T, E> {
    fn assert_ok(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    }

    fn assert_err_contains(self, needle: &str) {
        match self {
            Ok(_) => panic!("Expected an error mentioning '{}', got Ok", needle),
            Err(e) => {
                let message = format!("{:?}", e);
                assert!(message.contains(needle), "'{}' not found in error: {}", needle, message);
            }
        }
    }
}

pub trait OptionAssertions<T> {
    fn assert_some(self) -> T;
    fn assert_none(self);
}

impl<T> OptionAssertions<T> for Option<T> {
    fn assert_some(self) -> T {
        match self {
            Some(v) => v,
            None => panic!("Expected Some, got None"),
        }
    }

    fn assert_none(self) {
        if self.is_some() {
            panic!("Expected None, got Some");
        }
    }
}
