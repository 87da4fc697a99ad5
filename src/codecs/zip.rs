//! Zip archive codec

use super::{append_suffix, strip_suffix, CodecOptions, CompressionCodec};
use crate::utils::fs::remove_path;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Zip codec; accepts a single file or a whole directory
///
/// Directory entries are stored relative to the directory itself.
#[derive(Debug, Clone, Default)]
pub struct ZipCodec;

impl ZipCodec {
    pub fn new() -> Self {
        Self
    }

    fn write_archive(source: &Path, target: &Path) -> Result<()> {
        let file = File::create(target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        if source.is_file() {
            let name = source
                .file_name()
                .context("Source has no file name")?
                .to_string_lossy()
                .to_string();
            writer.start_file(name, options)?;
            io::copy(&mut File::open(source)?, &mut writer)?;
        } else {
            for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
                let entry = entry
                    .with_context(|| format!("Failed to walk directory: {}", source.display()))?;
                let name = entry
                    .path()
                    .strip_prefix(source)?
                    .to_string_lossy()
                    .replace('\\', "/");

                if entry.file_type().is_dir() {
                    writer.add_directory(format!("{}/", name), options)?;
                } else if entry.file_type().is_file() {
                    writer.start_file(name, options)?;
                    io::copy(&mut File::open(entry.path())?, &mut writer)?;
                }
            }
        }

        writer.finish()?;
        Ok(())
    }
}

impl CompressionCodec for ZipCodec {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn compress(
        &self,
        source: &Path,
        target: Option<&Path>,
        options: &CodecOptions,
    ) -> Result<PathBuf> {
        if !source.exists() {
            anyhow::bail!("Nothing to zip at {}", source.display());
        }

        let target = target
            .map(Path::to_path_buf)
            .unwrap_or_else(|| append_suffix(source, ".zip"));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        debug!("zip {} -> {}", source.display(), target.display());

        if let Err(e) = Self::write_archive(source, &target) {
            if let Err(cleanup) = remove_path(&target) {
                warn!("Failed to remove partial zip output: {}", cleanup);
            }
            return Err(e.context(format!("Failed to zip {}", source.display())));
        }

        if !options.keep_original {
            remove_path(source)?;
        }

        Ok(target)
    }

    fn decompress(
        &self,
        source: &Path,
        target: Option<&Path>,
        options: &CodecOptions,
    ) -> Result<PathBuf> {
        let target = target
            .map(Path::to_path_buf)
            .or_else(|| strip_suffix(source, ".zip"))
            .unwrap_or_else(|| append_suffix(source, ".d"));
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;

        debug!("unzip {} -> {}", source.display(), target.display());

        let file = File::open(source)
            .with_context(|| format!("Failed to open {}", source.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read zip archive {}", source.display()))?;
        archive
            .extract(&target)
            .with_context(|| format!("Failed to extract {}", source.display()))?;

        if !options.keep_original {
            fs::remove_file(source)
                .with_context(|| format!("Failed to remove {}", source.display()))?;
        }

        Ok(target)
    }
}
