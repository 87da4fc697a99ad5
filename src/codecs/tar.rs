//! Tar helpers used to feed directories to single-stream codecs

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::debug;
use walkdir::WalkDir;

/// Create an uncompressed tar of the *contents* of `source_dir`
///
/// Paths inside the archive are relative to `source_dir`, so extracting it
/// does not produce an extra top-level folder.
pub fn create_tar(source_dir: &Path, tar_path: &Path) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        anyhow::bail!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        );
    }

    debug!("tar {} -> {}", source_dir.display(), tar_path.display());

    let file = File::create(tar_path)
        .with_context(|| format!("Failed to create tar file: {}", tar_path.display()))?;
    let mut builder = Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);

    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir)?;

        if entry.file_type().is_dir() {
            builder
                .append_dir(name, path)
                .with_context(|| format!("Failed to append directory {}", path.display()))?;
        } else {
            builder.append_path_with_name(path, name).with_context(|| {
                format!("Failed to append {} as {}", path.display(), name.display())
            })?;
        }
    }

    let mut writer = builder
        .into_inner()
        .with_context(|| format!("Failed to finish tar archive: {}", tar_path.display()))?;
    writer.flush()?;

    Ok(tar_path.to_path_buf())
}

/// Unpack a tar archive into `target_dir`, creating it if needed
pub fn extract_tar(tar_path: &Path, target_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(target_dir).with_context(|| {
        format!("Failed to create extraction directory: {}", target_dir.display())
    })?;

    debug!("untar {} -> {}", tar_path.display(), target_dir.display());

    let file = File::open(tar_path)
        .with_context(|| format!("Failed to open tar file: {}", tar_path.display()))?;
    Archive::new(file).unpack(target_dir).with_context(|| {
        format!(
            "Failed to unpack {} to {}",
            tar_path.display(),
            target_dir.display()
        )
    })?;

    Ok(target_dir.to_path_buf())
}
