//! Filesystem adapter - copies directory trees into a staging directory

use super::SourceAdapter;
use crate::codecs::tar::extract_tar;
use crate::models::{artifact_stem, artifact_timestamp, BackupOutcome, BackupRequest, RestoreOptions};
use crate::utils::fs::{copy_tree, path_size, remove_path, ExclusionSet};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Backs up files and directories by copying them
///
/// With a single source directory the artifact holds that directory's
/// contents; with several sources each one gets its own folder named after
/// its basename.
#[derive(Debug, Clone, Default)]
pub struct FilesystemAdapter {
    default_paths: Vec<PathBuf>,
    default_excludes: Vec<String>,
}

impl FilesystemAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths used when a request names none
    pub fn with_default_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.default_paths = paths;
        self
    }

    /// Exclusions applied to every backup in addition to the request's
    pub fn with_default_excludes(mut self, excludes: Vec<String>) -> Self {
        self.default_excludes = excludes;
        self
    }

    fn sources<'a>(&'a self, request: &'a BackupRequest) -> &'a [PathBuf] {
        if request.options.paths.is_empty() {
            &self.default_paths
        } else {
            &request.options.paths
        }
    }

    fn exclusions(&self, request: &BackupRequest) -> Result<ExclusionSet> {
        let patterns: Vec<&str> = self
            .default_excludes
            .iter()
            .chain(request.exclude.iter())
            .map(String::as_str)
            .collect();
        ExclusionSet::new(&patterns)
    }

    fn stage(&self, sources: &[PathBuf], staging: &Path, exclusions: &ExclusionSet) -> Result<usize> {
        fs::create_dir_all(staging)
            .with_context(|| format!("Failed to create staging directory {}", staging.display()))?;

        if let [single] = sources {
            if single.is_dir() {
                return copy_tree(single, staging, exclusions);
            }
        }

        let mut used = BTreeSet::new();
        let mut copied = 0;
        for source in sources {
            let base = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "root".to_string());
            let mut folder = base.clone();
            let mut n = 1;
            while !used.insert(folder.clone()) {
                n += 1;
                folder = format!("{}_{}", base, n);
            }
            copied += copy_tree(source, &staging.join(&folder), exclusions)?;
        }
        Ok(copied)
    }

    fn restore_target(&self, options: &RestoreOptions) -> Result<PathBuf> {
        if let Some(target) = &options.target {
            return Ok(target.clone());
        }
        match self.default_paths.as_slice() {
            [single] => Ok(single.clone()),
            _ => anyhow::bail!("A restore target is required for filesystem restores"),
        }
    }
}

impl SourceAdapter for FilesystemAdapter {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn supports(&self, backup_type: &str) -> bool {
        matches!(backup_type, "filesystem" | "files")
    }

    fn validate(&self, request: &BackupRequest) -> Vec<String> {
        let mut errors = Vec::new();

        if request.output_dir().is_none() {
            errors.push("Output path is required".to_string());
        }
        if request.name.trim().is_empty() {
            errors.push("Backup name is required".to_string());
        }

        let sources = self.sources(request);
        if sources.is_empty() {
            errors.push("At least one path is required for filesystem backups".to_string());
        }
        for path in sources {
            if !path.exists() {
                errors.push(format!("Path does not exist: {}", path.display()));
            }
        }

        if let Err(e) = self.exclusions(request) {
            errors.push(format!("{:#}", e));
        }

        errors
    }

    fn backup(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        let started = Instant::now();
        let output = request.output_dir().context("Output path is required")?;
        let created_at = Utc::now();
        let staging = output.join(artifact_stem(&request.name, created_at));
        // The output directory may live inside a source
        let exclusions = self.exclusions(request)?.skip_path(output);
        let sources = self.sources(request);

        info!(
            "Copying {} path(s) for '{}' into {}",
            sources.len(),
            request.name,
            staging.display()
        );

        let copied = match self.stage(sources, &staging, &exclusions) {
            Ok(count) => count,
            Err(e) => {
                if let Err(cleanup) = remove_path(&staging) {
                    warn!("Failed to remove staging directory: {}", cleanup);
                }
                return Err(e);
            }
        };

        let size = path_size(&staging)?;
        let sources_list: Vec<String> = sources.iter().map(|p| p.display().to_string()).collect();

        Ok(BackupOutcome::succeeded(&staging, size)
            .with_duration(started.elapsed().as_secs_f64())
            .with_metadata("files", copied.to_string())
            .with_metadata("sources", sources_list.join(",")))
    }

    fn restore(&self, artifact: &Path, options: &RestoreOptions) -> Result<bool> {
        let target = self.restore_target(options)?;

        if options.backup_existing && target.exists() {
            let mut safety = target.clone().into_os_string();
            safety.push(format!(".pre-restore-{}", artifact_timestamp(Utc::now())));
            let safety = PathBuf::from(safety);
            info!("Moving existing {} to {}", target.display(), safety.display());
            fs::rename(&target, &safety).with_context(|| {
                format!("Failed to move {} aside before restore", target.display())
            })?;
        }

        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create restore target {}", target.display()))?;

        let is_tar = artifact
            .extension()
            .map(|e| e.eq_ignore_ascii_case("tar"))
            .unwrap_or(false);

        if artifact.is_dir() {
            copy_tree(artifact, &target, &ExclusionSet::default())?;
        } else if is_tar {
            extract_tar(artifact, &target)?;
        } else if artifact.is_file() {
            let name = artifact.file_name().context("Artifact has no file name")?;
            fs::copy(artifact, target.join(name))
                .with_context(|| format!("Failed to copy {}", artifact.display()))?;
        } else {
            anyhow::bail!("Backup artifact not found: {}", artifact.display());
        }

        info!("Restored {} into {}", artifact.display(), target.display());
        Ok(true)
    }
}
