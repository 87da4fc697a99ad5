//! Compression codecs
//!
//! Each codec turns a source path into a compressed artifact and back.
//! The archive coordinator decides which codec to use and handles the
//! directory-versus-file cases a single-stream codec cannot.

pub mod gzip;
pub mod tar;
pub mod zip;

pub use self::gzip::GzipCodec;
pub use self::zip::ZipCodec;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Compression formats the coordinator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    Zip,
    Gzip,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::Zip => "zip",
            CompressionType::Gzip => "gzip",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zip" => Ok(CompressionType::Zip),
            "gzip" | "gz" => Ok(CompressionType::Gzip),
            other => Err(other.to_string()),
        }
    }
}

/// Options shared by every codec call
#[derive(Debug, Clone, Copy)]
pub struct CodecOptions {
    /// Leave the source in place after a successful run
    pub keep_original: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            keep_original: true,
        }
    }
}

/// A compression/decompression strategy
pub trait CompressionCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compress `source` into `target` (or a codec-chosen sibling path)
    fn compress(&self, source: &Path, target: Option<&Path>, options: &CodecOptions)
        -> Result<PathBuf>;

    /// Reverse [`CompressionCodec::compress`]
    fn decompress(
        &self,
        source: &Path,
        target: Option<&Path>,
        options: &CodecOptions,
    ) -> Result<PathBuf>;
}

/// Append `suffix` to the full file name (`a.sql` + `.gz` = `a.sql.gz`)
pub(crate) fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// Strip a case-insensitive suffix from the file name, if present
pub(crate) fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy().to_string();
    if name.len() <= suffix.len() || !name.to_lowercase().ends_with(&suffix.to_lowercase()) {
        return None;
    }
    Some(path.with_file_name(&name[..name.len() - suffix.len()]))
}
