//! Single-stream gzip codec

use super::{append_suffix, strip_suffix, CodecOptions, CompressionCodec};
use crate::utils::fs::remove_path;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Gzip codec backed by `flate2`; works on single files only
#[derive(Debug, Clone, Default)]
pub struct GzipCodec {
    level: Option<u32>,
}

impl GzipCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: Some(level.min(9)),
        }
    }

    fn compression(&self) -> Compression {
        self.level.map(Compression::new).unwrap_or_default()
    }
}

impl CompressionCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(
        &self,
        source: &Path,
        target: Option<&Path>,
        options: &CodecOptions,
    ) -> Result<PathBuf> {
        if !source.is_file() {
            anyhow::bail!("gzip can only compress a single file: {}", source.display());
        }

        let target = target
            .map(Path::to_path_buf)
            .unwrap_or_else(|| append_suffix(source, ".gz"));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        debug!("gzip {} -> {}", source.display(), target.display());

        let written = (|| -> Result<()> {
            let mut input = BufReader::new(
                File::open(source).with_context(|| format!("Failed to open {}", source.display()))?,
            );
            let output = File::create(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            let mut encoder = GzEncoder::new(BufWriter::new(output), self.compression());
            io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
            Ok(())
        })();

        if let Err(e) = written {
            if let Err(cleanup) = remove_path(&target) {
                warn!("Failed to remove partial gzip output: {}", cleanup);
            }
            return Err(e.context(format!("Failed to gzip {}", source.display())));
        }

        if !options.keep_original {
            fs::remove_file(source)
                .with_context(|| format!("Failed to remove {}", source.display()))?;
        }

        Ok(target)
    }

    fn decompress(
        &self,
        source: &Path,
        target: Option<&Path>,
        options: &CodecOptions,
    ) -> Result<PathBuf> {
        let stripped = strip_suffix(source, ".gz")
            .unwrap_or_else(|| append_suffix(source, ".out"));
        let target = match target {
            Some(dir) if dir.is_dir() => dir.join(stripped.file_name().unwrap_or_default()),
            Some(path) => path.to_path_buf(),
            None => stripped,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        debug!("gunzip {} -> {}", source.display(), target.display());

        let written = (|| -> Result<()> {
            let input = File::open(source)
                .with_context(|| format!("Failed to open {}", source.display()))?;
            let mut decoder = GzDecoder::new(BufReader::new(input));
            let mut output = BufWriter::new(
                File::create(&target)
                    .with_context(|| format!("Failed to create {}", target.display()))?,
            );
            io::copy(&mut decoder, &mut output)?;
            output.flush()?;
            Ok(())
        })();

        if let Err(e) = written {
            if let Err(cleanup) = remove_path(&target) {
                warn!("Failed to remove partial gunzip output: {}", cleanup);
            }
            return Err(e.context(format!("Failed to gunzip {}", source.display())));
        }

        if !options.keep_original {
            fs::remove_file(source)
                .with_context(|| format!("Failed to remove {}", source.display()))?;
        }

        Ok(target)
    }
}
