//! Archive coordinator - picks a codec and manages intermediate files

use crate::codecs::tar::{create_tar, extract_tar};
use crate::codecs::{
    append_suffix, strip_suffix, CodecOptions, CompressionCodec, CompressionType, GzipCodec,
    ZipCodec,
};
use crate::error::ArchiveError;
use crate::utils::fs::remove_path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Centralizes compress/decompress decisions for the orchestrator
///
/// Single-stream codecs cannot take a directory, so a gzip request for a
/// directory goes through an intermediate tar that is always removed.
#[derive(Clone, Default)]
pub struct ArchiveCoordinator {
    codecs: BTreeMap<CompressionType, Arc<dyn CompressionCodec>>,
}

impl ArchiveCoordinator {
    /// Coordinator with no codecs registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator with the built-in zip and gzip codecs
    pub fn with_default_codecs() -> Self {
        Self::new()
            .with_codec(CompressionType::Zip, Arc::new(ZipCodec::new()))
            .with_codec(CompressionType::Gzip, Arc::new(GzipCodec::new()))
    }

    pub fn with_codec(mut self, kind: CompressionType, codec: Arc<dyn CompressionCodec>) -> Self {
        self.codecs.insert(kind, codec);
        self
    }

    /// Registered codec kinds
    pub fn codec_kinds(&self) -> Vec<CompressionType> {
        self.codecs.keys().copied().collect()
    }

    fn codec_by_name(&self, name: &str) -> ArchiveResult<(CompressionType, Arc<dyn CompressionCodec>)> {
        let kind: CompressionType = name
            .parse()
            .map_err(|_| ArchiveError::UnsupportedCompression(name.to_string()))?;
        self.codec(kind).map(|codec| (kind, codec))
    }

    fn codec(&self, kind: CompressionType) -> ArchiveResult<Arc<dyn CompressionCodec>> {
        self.codecs
            .get(&kind)
            .cloned()
            .ok_or_else(|| ArchiveError::CompressionAdapterUnavailable(kind.to_string()))
    }

    /// Compress `source` into `target` with the named codec
    ///
    /// Returns the final artifact path, which differs from `target` when a
    /// directory is gzipped and the name is forced to end in `.tar.gz`.
    pub fn compress(
        &self,
        source: &Path,
        target: &Path,
        codec_name: &str,
        remove_source: bool,
    ) -> ArchiveResult<PathBuf> {
        let (kind, codec) = self.codec_by_name(codec_name)?;
        let options = CodecOptions {
            keep_original: !remove_source,
        };

        info!(
            "Compressing {} with {} to {}",
            source.display(),
            kind,
            target.display()
        );

        match kind {
            CompressionType::Gzip if source.is_dir() => {
                self.gzip_directory(codec.as_ref(), source, target, remove_source)
            }
            _ => Ok(codec.compress(source, Some(target), &options)?),
        }
    }

    fn gzip_directory(
        &self,
        codec: &dyn CompressionCodec,
        source: &Path,
        target: &Path,
        remove_source: bool,
    ) -> ArchiveResult<PathBuf> {
        let target = tar_gz_target(target);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;

        // Removed when dropped, whether or not gzip succeeds
        let intermediate = tempfile::Builder::new()
            .prefix(".backup-orchestrator-")
            .suffix(".tar")
            .tempfile_in(&parent)?;
        debug!("Intermediate tar: {}", intermediate.path().display());

        create_tar(source, intermediate.path())?;
        let result = codec.compress(intermediate.path(), Some(&target), &CodecOptions::default())?;
        drop(intermediate);

        if remove_source {
            if let Err(e) = remove_path(source) {
                warn!("Failed to remove source after compression: {}", e);
            }
        }

        Ok(result)
    }

    /// Decompress `archive`, or pass it through unchanged if it is not a
    /// recognized compressed format
    ///
    /// Without a `target`, zip and tar.gz archives are unpacked into a fresh
    /// scratch directory that the caller owns afterwards.
    pub fn decompress(
        &self,
        archive: &Path,
        target: Option<&Path>,
        keep_original: bool,
    ) -> ArchiveResult<PathBuf> {
        let options = CodecOptions { keep_original };
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match Self::detect_compression_type(archive) {
            Some(CompressionType::Zip) => {
                let codec = self.codec(CompressionType::Zip)?;
                let (target, scratch) = extraction_target(target)?;
                let result = codec.decompress(archive, Some(&target), &options)?;
                keep_scratch(scratch);
                Ok(result)
            }
            Some(CompressionType::Gzip) if name.ends_with(".tar.gz") || name.ends_with(".tgz") => {
                let codec = self.codec(CompressionType::Gzip)?;
                let (target, scratch) = extraction_target(target)?;
                std::fs::create_dir_all(&target)?;

                let staging = tempfile::Builder::new()
                    .prefix(".backup-orchestrator-")
                    .tempdir()?;
                let tar_path = staging.path().join("archive.tar");
                codec.decompress(archive, Some(&tar_path), &CodecOptions::default())?;
                extract_tar(&tar_path, &target)?;
                drop(staging);

                keep_scratch(scratch);
                if !keep_original {
                    std::fs::remove_file(archive)?;
                }
                Ok(target)
            }
            Some(CompressionType::Gzip) => {
                let codec = self.codec(CompressionType::Gzip)?;
                Ok(codec.decompress(archive, target, &options)?)
            }
            None => {
                debug!("{} is not compressed, passing through", archive.display());
                Ok(archive.to_path_buf())
            }
        }
    }

    /// Compression type implied by a file extension (case-insensitive)
    pub fn detect_compression_type(path: &Path) -> Option<CompressionType> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(CompressionType::Zip)
        } else if name.ends_with(".gz") || name.ends_with(".tgz") {
            Some(CompressionType::Gzip)
        } else {
            None
        }
    }
}

fn tar_gz_target(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tar.gz") {
        return target.to_path_buf();
    }
    let base = strip_suffix(target, ".gz").unwrap_or_else(|| target.to_path_buf());
    let base = strip_suffix(&base, ".tar").unwrap_or(base);
    append_suffix(&base, ".tar.gz")
}

/// Where to extract, plus the scratch directory made when no target was given
///
/// The scratch directory is removed on drop; [`keep_scratch`] hands it to
/// the caller once extraction has succeeded.
fn extraction_target(target: Option<&Path>) -> ArchiveResult<(PathBuf, Option<TempDir>)> {
    if let Some(target) = target {
        return Ok((target.to_path_buf(), None));
    }
    let dir = tempfile::Builder::new()
        .prefix("backup-orchestrator-extract-")
        .tempdir()?;
    Ok((dir.path().to_path_buf(), Some(dir)))
}

fn keep_scratch(scratch: Option<TempDir>) {
    if let Some(dir) = scratch {
        let _ = dir.keep();
    }
}
