//! Archive engine: guarded extraction, archive creation, hashing and path
//! containment.
//!
//! Extraction is two-phase. [`scan::scan_archive`] validates the whole
//! central directory first; only a passing [`scan::ScanReport`] is handed to
//! the write phase, so a rejected archive never produces output.

pub mod hash;
pub mod scan;

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};
use crate::error::{Result, SatchelError};

pub use hash::{hash_bytes, hash_file, verify_file};
pub use scan::{normalize_entry_name, scan_archive, ScanReport, ScannedEntry};

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_COMPRESSION_RATIO: f64 = 100.0;

const COPY_BUFFER: usize = 64 * 1024;

/// Resource limits applied to every archive before and during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveLimits {
    /// Maximum number of entries (files and directories).
    pub max_entries: usize,
    /// Maximum uncompressed size of a single entry in bytes.
    pub max_file_size: u64,
    /// Maximum uncompressed size of the whole archive in bytes.
    pub max_total_size: u64,
    /// Maximum ratio of uncompressed to compressed bytes.
    pub max_compression_ratio: f64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_compression_ratio: DEFAULT_MAX_COMPRESSION_RATIO,
        }
    }
}

/// Extracts, creates and hashes tool archives, confined to a base directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    base_dir: PathBuf,
    limits: ArchiveLimits,
}

impl Archiver {
    /// Creates an archiver confined to `base_dir` with default limits.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        Self::with_limits(base_dir, ArchiveLimits::default())
    }

    pub fn with_limits<P: AsRef<Path>>(base_dir: P, limits: ArchiveLimits) -> Result<Self> {
        let base = base_dir.as_ref();
        let absolute = std::path::absolute(base).map_err(|e| SatchelError::io(base, e))?;
        Ok(Self {
            base_dir: clean_path(&absolute),
            limits,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn limits(&self) -> &ArchiveLimits {
        &self.limits
    }

    /// Resolves `candidate` to an absolute, lexically cleaned path and checks
    /// that it lies inside the base directory.
    ///
    /// Relative candidates are taken relative to the base directory.
    pub fn validate_path<P: AsRef<Path>>(&self, candidate: P) -> Result<PathBuf> {
        let candidate = candidate.as_ref();
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_dir.join(candidate)
        };
        let cleaned = clean_path(&joined);
        if cleaned.starts_with(&self.base_dir) {
            Ok(cleaned)
        } else {
            Err(SatchelError::OutsideBaseDir {
                path: candidate.to_path_buf(),
                base: self.base_dir.clone(),
            })
        }
    }

    /// Creates a directory (and its parents) inside the base directory.
    pub fn create_dir<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = self.validate_path(path)?;
        fs::create_dir_all(&path).map_err(|e| SatchelError::io(&path, e))?;
        Ok(path)
    }

    /// Removes a directory tree inside the base directory. Missing
    /// directories are not an error.
    pub fn remove_dir<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = self.validate_path(path)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SatchelError::io(&path, e)),
        }
    }

    /// Validates the archive without extracting it.
    pub fn scan<P: AsRef<Path>>(&self, archive_path: P) -> Result<ScanReport> {
        let archive_path = archive_path.as_ref();
        let mut archive = open_archive(archive_path)?;
        scan_archive(&mut archive, &self.limits, archive_path)
    }

    /// Extracts `archive_path` into `destination`.
    ///
    /// The archive is fully pre-scanned first; if any entry is rejected the
    /// destination is not created and nothing is written.
    pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        archive_path: P,
        destination: Q,
    ) -> Result<ScanReport> {
        let archive_path = archive_path.as_ref();
        let destination = self.validate_path(destination)?;

        let mut archive = open_archive(archive_path)?;
        let report = scan_archive(&mut archive, &self.limits, archive_path)?;

        fs::create_dir_all(&destination).map_err(|e| SatchelError::io(&destination, e))?;
        let canonical_dest = destination
            .canonicalize()
            .map_err(|e| SatchelError::io(&destination, e))?;

        let mut written_total: u64 = 0;
        for entry in &report.entries {
            let target = clean_path(&destination.join(&entry.path));
            if !target.starts_with(&destination) {
                return Err(SatchelError::PathTraversal { entry: entry.name.clone() });
            }

            if entry.is_dir {
                fs::create_dir_all(&target).map_err(|e| SatchelError::io(&target, e))?;
                continue;
            }

            let parent = target.parent().unwrap_or(&destination);
            fs::create_dir_all(parent).map_err(|e| SatchelError::io(parent, e))?;
            // catches directories that are symlinks on disk
            let canonical_parent = parent
                .canonicalize()
                .map_err(|e| SatchelError::io(parent, e))?;
            if !canonical_parent.starts_with(&canonical_dest) {
                return Err(SatchelError::PathTraversal { entry: entry.name.clone() });
            }

            let mut file = archive.by_index(entry.index)?;
            let written = self.copy_bounded(&mut file, &target, &entry.name)?;
            written_total = written_total.saturating_add(written);
            if written_total > self.limits.max_total_size {
                let _ = fs::remove_file(&target);
                return Err(SatchelError::ArchiveTooLarge {
                    total: written_total,
                    max: self.limits.max_total_size,
                });
            }
            trace!(entry = %entry.name, bytes = written, "extracted");
        }

        debug!(
            archive = %archive_path.display(),
            destination = %destination.display(),
            files = report.file_count(),
            "archive extracted"
        );
        Ok(report)
    }

    /// Copies at most `max_file_size` bytes from `reader` into a new file at
    /// `target`. Declared sizes can lie, so the limit is enforced on the bytes
    /// actually produced; an oversized file is deleted.
    fn copy_bounded<R: Read>(&self, reader: &mut R, target: &Path, entry: &str) -> Result<u64> {
        let mut out = File::create(target).map_err(|e| SatchelError::io(target, e))?;
        let max = self.limits.max_file_size;
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut written: u64 = 0;

        let result = loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break Ok(written),
                Ok(n) => n,
                Err(e) => break Err(SatchelError::io(target, e)),
            };
            written += n as u64;
            if written > max {
                break Err(SatchelError::EntryTooLarge {
                    entry: entry.to_string(),
                    size: written,
                    max,
                });
            }
            if let Err(e) = out.write_all(&buf[..n]) {
                break Err(SatchelError::io(target, e));
            }
        };

        if result.is_err() {
            drop(out);
            let _ = fs::remove_file(target);
        }
        result
    }

    /// Packs `source_dir` into a new archive at `archive_path`.
    ///
    /// Entries whose name starts with a dot are skipped at every level below
    /// the root, as are symlinks. Entry names always use `/`. Directories are
    /// stored, files are deflated. Returns the number of entries written.
    pub fn create<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source_dir: P,
        archive_path: Q,
    ) -> Result<usize> {
        let source_dir = source_dir.as_ref();
        let archive_path = archive_path.as_ref();
        if !source_dir.is_dir() {
            return Err(SatchelError::io(
                source_dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source is not a directory"),
            ));
        }
        let archive_abs = std::path::absolute(archive_path)
            .map_err(|e| SatchelError::io(archive_path, e))?;

        let file = File::create(archive_path).map_err(|e| SatchelError::io(archive_path, e))?;
        let mut zip = ZipWriter::new(file);
        let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let file_options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(false);

        let walker = WalkDir::new(source_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        let mut count = 0usize;
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source_dir.to_path_buf());
                SatchelError::io(path, std::io::Error::other(e.to_string()))
            })?;
            if entry.depth() == 0 {
                continue;
            }
            let path = entry.path();
            if std::path::absolute(path).map(|p| p == archive_abs).unwrap_or(false) {
                continue;
            }
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                debug!(path = %path.display(), "skipping symlink");
                continue;
            }

            let name = archive_name(source_dir, path)?;
            if file_type.is_dir() {
                zip.add_directory(format!("{name}/"), dir_options)?;
            } else {
                let options = if entry.metadata().map(|m| m.len() >= u32::MAX as u64).unwrap_or(false) {
                    file_options.large_file(true)
                } else {
                    file_options
                };
                zip.start_file(name, options)?;
                let mut src = BufReader::new(File::open(path).map_err(|e| SatchelError::io(path, e))?);
                std::io::copy(&mut src, &mut zip).map_err(|e| SatchelError::io(path, e))?;
            }
            count += 1;
        }

        zip.finish()?;
        debug!(source = %source_dir.display(), archive = %archive_path.display(), entries = count, "archive created");
        Ok(count)
    }

    pub fn hash<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        hash_file(path)
    }

    pub fn verify<P: AsRef<Path>>(&self, path: P, expected: &str) -> Result<()> {
        verify_file(path, expected)
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path).map_err(|e| SatchelError::io(path, e))?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Relative path of `path` below `root`, joined with `/`.
fn archive_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| SatchelError::OutsideBaseDir {
        path: path.to_path_buf(),
        base: root.to_path_buf(),
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Lexically resolves `.` and `..` components without touching the
/// filesystem. `..` never climbs above the root.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
