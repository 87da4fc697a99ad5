//! Filesystem helpers shared by adapters, storage backends and the orchestrator

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Size of a file, or the summed size of every file below a directory
pub fn path_size(path: &Path) -> Result<u64> {
    let metadata =
        fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}

/// Remove a file or a directory tree; absent paths are fine
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory {}", path.display())),
        Ok(_) => fs::remove_file(path)
            .with_context(|| format!("Failed to remove file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    }
}

/// Names directly inside `dir`, empty if it does not exist
pub fn dir_entries(dir: &Path) -> BTreeSet<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}

/// Copy a file or directory tree to `dest`, skipping excluded relative paths
///
/// Returns the number of files copied.
pub fn copy_tree(source: &Path, dest: &Path, exclusions: &ExclusionSet) -> Result<usize> {
    if source.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)
            .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;
        return Ok(1);
    }

    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory {}", dest.display()))?;

    // Skipped paths are canonical, so walk from the canonical root
    let root = if exclusions.skipped.is_empty() {
        source.to_path_buf()
    } else {
        fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf())
    };

    let mut copied = 0;
    let walker = WalkDir::new(&root).min_depth(1).into_iter().filter_entry(|entry| {
        !exclusions.is_skipped(entry.path())
            && entry
                .path()
                .strip_prefix(&root)
                .map(|rel| !exclusions.is_excluded(rel))
                .unwrap_or(true)
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        let rel = entry.path().strip_prefix(&root)?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Exclusion patterns matched against paths relative to a backup root
///
/// A plain pattern (`cache`, `var/tmp`) excludes that path and everything
/// below it, and also any path component with that name. Patterns with `*`,
/// `**` or `?` are globs over the whole relative path or the file name.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    literals: Vec<String>,
    globs: Vec<Regex>,
    /// Absolute paths never walked into, whatever the patterns say
    skipped: Vec<PathBuf>,
}

impl ExclusionSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().trim_matches('/');
            if pattern.is_empty() {
                continue;
            }
            if pattern.contains(['*', '?']) {
                let regex = Regex::new(&glob_to_regex(pattern))
                    .with_context(|| format!("Invalid exclusion pattern: {}", pattern))?;
                set.globs.push(regex);
            } else {
                set.literals.push(pattern.to_string());
            }
        }
        Ok(set)
    }

    /// Never copy `path` or anything below it
    pub fn skip_path(mut self, path: &Path) -> Self {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.skipped.push(path);
        self
    }

    pub fn is_skipped(&self, path: &Path) -> bool {
        self.skipped.iter().any(|skipped| path == skipped)
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.globs.is_empty()
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        let rel = relative.to_string_lossy().replace('\\', "/");
        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let literal_hit = self.literals.iter().any(|lit| {
            rel == *lit
                || rel.starts_with(&format!("{}/", lit))
                || (!lit.contains('/') && rel.split('/').any(|c| c == lit))
        });

        literal_hit
            || self
                .globs
                .iter()
                .any(|re| re.is_match(&rel) || re.is_match(&file_name))
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
