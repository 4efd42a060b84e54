//! Pre-scan of an archive's central directory.
//!
//! Nothing here reads entry contents or touches the filesystem; the scan only
//! looks at names, types and declared sizes so an archive can be rejected
//! before a single byte is extracted.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;
use crate::archive::ArchiveLimits;
use crate::error::{Result, SatchelError};

/// One archive entry that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedEntry {
    /// Index of the entry inside the archive.
    pub index: usize,
    /// Raw entry name as stored in the archive.
    pub name: String,
    /// Normalised relative path the entry extracts to.
    pub path: PathBuf,
    pub is_dir: bool,
    /// Declared uncompressed size.
    pub size: u64,
    pub compressed_size: u64,
}

/// Result of a successful pre-scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub entries: Vec<ScannedEntry>,
    pub total_size: u64,
    pub total_compressed_size: u64,
}

impl ScanReport {
    /// Uncompressed to compressed size ratio, if anything is compressed at all.
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.total_compressed_size == 0 {
            None
        } else {
            Some(self.total_size as f64 / self.total_compressed_size as f64)
        }
    }

    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_dir).count()
    }
}

/// Normalises an entry name into a relative path.
///
/// Backslashes are treated as separators, `.` segments are dropped, and the
/// name is rejected if it is absolute, starts with a separator, carries a
/// drive prefix or contains a `..` segment.
pub fn normalize_entry_name(name: &str) -> Result<PathBuf> {
    let traversal = || SatchelError::PathTraversal { entry: name.to_string() };

    let unified = name.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) || name.contains('\0') {
        return Err(traversal());
    }

    let mut path = PathBuf::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(traversal()),
            segment => path.push(segment),
        }
    }
    if path.is_absolute() || path.has_root() {
        return Err(traversal());
    }
    Ok(path)
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Validates every entry of `archive` against `limits`.
///
/// `source` is only used for error context.
pub fn scan_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    limits: &ArchiveLimits,
    source: &Path,
) -> Result<ScanReport> {
    let count = archive.len();
    if count == 0 {
        return Err(SatchelError::EmptyArchive { path: source.to_path_buf() });
    }
    if count > limits.max_entries {
        return Err(SatchelError::TooManyEntries { count, max: limits.max_entries });
    }

    let mut report = ScanReport::default();
    for index in 0..count {
        let entry = archive.by_index_raw(index)?;
        let name = entry.name().to_string();

        let path = normalize_entry_name(&name)?;
        if entry.is_symlink() {
            return Err(SatchelError::SymlinkEntry { entry: name });
        }
        let is_dir = entry.is_dir();
        if path.as_os_str().is_empty() && !is_dir {
            return Err(SatchelError::PathTraversal { entry: name });
        }

        let size = entry.size();
        if size > limits.max_file_size {
            return Err(SatchelError::EntryTooLarge {
                entry: name,
                size,
                max: limits.max_file_size,
            });
        }

        report.total_size = report.total_size.saturating_add(size);
        if report.total_size > limits.max_total_size {
            return Err(SatchelError::ArchiveTooLarge {
                total: report.total_size,
                max: limits.max_total_size,
            });
        }
        let compressed_size = entry.compressed_size();
        report.total_compressed_size = report.total_compressed_size.saturating_add(compressed_size);

        report.entries.push(ScannedEntry {
            index,
            name,
            path,
            is_dir,
            size,
            compressed_size,
        });
    }

    if let Some(ratio) = report.compression_ratio() {
        if ratio > limits.max_compression_ratio {
            return Err(SatchelError::CompressionBomb {
                ratio,
                max: limits.max_compression_ratio,
            });
        }
    }

    debug!(
        archive = %source.display(),
        entries = report.entries.len(),
        total_size = report.total_size,
        "archive pre-scan passed"
    );
    Ok(report)
}
