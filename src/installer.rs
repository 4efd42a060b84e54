//! Installing, updating and removing tools.
//!
//! The [`Installer`] ties the registry cache, the archive engine and the lock
//! store to a [`Fetcher`]. A tool's files are only moved into place after its
//! archive has been verified and fully extracted, and its lock record is only
//! written after that.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use crate::archive::{hash_file, verify_file, Archiver};
use crate::error::{Result, SatchelError};
use crate::fetch::Fetcher;
use crate::global::cache::RegistryCache;
use crate::lock::{InstalledTool, LockStore, REGISTRY_SOURCE};
use crate::registry::{RegistryDocument, ToolDescriptor, ToolType};
use crate::util::validate_tool_name;

/// A locked tool whose registry version differs from the installed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedTool {
    pub name: String,
    pub installed_version: String,
    pub latest_version: String,
    pub tool_type: ToolType,
}

/// What happened to a single tool during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub name: String,
    pub outcome: UpdateOutcome,
    pub message: String,
}

/// Summary of a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub name: String,
    pub version: String,
    pub tool_type: ToolType,
    pub path: PathBuf,
    /// SHA-256 of the installed archive.
    pub integrity: String,
    pub files: usize,
}

pub struct Installer<F: Fetcher> {
    fetcher: F,
    archiver: Archiver,
    cache: RegistryCache,
    lock: LockStore,
}

impl<F: Fetcher> Installer<F> {
    /// Tools are installed below the archiver's base directory.
    pub fn new(fetcher: F, archiver: Archiver, cache: RegistryCache, lock: LockStore) -> Self {
        Self { fetcher, archiver, cache, lock }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    pub fn lock(&self) -> &LockStore {
        &self.lock
    }

    /// Directory a tool of `tool_type` named `name` is installed into.
    pub fn install_path(&self, name: &str, tool_type: ToolType) -> Result<PathBuf> {
        validate_tool_name(name)?;
        self.archiver
            .validate_path(Path::new(tool_type.dir_name()).join(name))
    }

    /// Returns the registry document, from cache when it is still fresh.
    ///
    /// An expired cache entry is refreshed; if that fetch fails the stale
    /// document is served. With no cache entry at all a failed fetch is an
    /// error. `refresh` skips the cache lookup.
    pub fn registry(&self, refresh: bool) -> Result<RegistryDocument> {
        if !refresh {
            match self.cache.get() {
                Ok(doc) => return Ok(doc),
                Err(SatchelError::CacheMiss) => {}
                Err(SatchelError::CacheExpired { .. }) => {
                    return self.fetch_registry().or_else(|e| {
                        warn!(error = %e, "registry refresh failed, using expired cache");
                        self.cache.get_stale()
                    });
                }
                Err(e) => {
                    warn!(error = %e, "unreadable registry cache, refetching");
                }
            }
        }
        self.fetch_registry()
    }

    fn fetch_registry(&self) -> Result<RegistryDocument> {
        let bytes = self.fetcher.fetch_registry_document()?;
        let doc = RegistryDocument::from_slice(&bytes)?;
        self.cache.set(&doc)?;
        debug!(tools = doc.tool_count(), "registry fetched");
        Ok(doc)
    }

    /// Installs the latest version of `name`.
    pub fn install(&self, name: &str) -> Result<InstallReport> {
        self.install_with(name, None, None)
    }

    /// Installs exactly `version` of `name`.
    pub fn install_version(&self, name: &str, version: &str) -> Result<InstallReport> {
        self.install_with(name, Some(version), None)
    }

    pub fn install_with(
        &self,
        name: &str,
        version: Option<&str>,
        tool_type: Option<ToolType>,
    ) -> Result<InstallReport> {
        validate_tool_name(name)?;
        let registry = self.registry(false)?;
        let descriptor = registry.resolve(name, version, tool_type)?.clone();
        self.install_descriptor(&descriptor)
    }

    /// Downloads, verifies and extracts `descriptor`, then records it.
    ///
    /// If the lock write fails after the files were put in place the result
    /// is [`SatchelError::PartialInstall`].
    pub fn install_descriptor(&self, descriptor: &ToolDescriptor) -> Result<InstallReport> {
        descriptor.validate()?;
        let name = descriptor.name.as_str();
        if let Ok(existing) = self.lock.get_tool(name) {
            if existing.tool_type != descriptor.tool_type {
                return Err(SatchelError::AmbiguousTool {
                    name: name.to_string(),
                    types: format!("{} installed, {} requested", existing.tool_type, descriptor.tool_type),
                });
            }
        }

        let bytes = self.fetcher.fetch_archive(&descriptor.file)?;
        let type_dir = self.archiver.create_dir(descriptor.tool_type.dir_name())?;

        let mut download = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".zip")
            .tempfile_in(&type_dir)
            .map_err(|e| SatchelError::io(&type_dir, e))?;
        download
            .write_all(&bytes)
            .and_then(|_| download.flush())
            .map_err(|e| SatchelError::io(download.path(), e))?;

        if let Some(expected) = descriptor.sha256.as_deref().filter(|h| !h.trim().is_empty()) {
            verify_file(download.path(), expected)?;
        }
        let integrity = hash_file(download.path())?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&type_dir)
            .map_err(|e| SatchelError::io(&type_dir, e))?;
        let report = self.archiver.extract(download.path(), staging.path())?;

        let target = self.install_path(name, descriptor.tool_type)?;
        replace_dir(staging.path(), &target, &type_dir, |from, to| fs::rename(from, to))?;

        let record = InstalledTool::new(
            &descriptor.version,
            descriptor.tool_type,
            REGISTRY_SOURCE,
            &integrity,
        );
        self.lock
            .add_tool_from(name, record, &self.fetcher.registry_identity())
            .map_err(|e| SatchelError::PartialInstall {
                name: name.to_string(),
                path: target.clone(),
                source: Box::new(e),
            })?;

        info!(tool = name, version = %descriptor.version, kind = %descriptor.tool_type, "installed");
        Ok(InstallReport {
            name: name.to_string(),
            version: descriptor.version.clone(),
            tool_type: descriptor.tool_type,
            path: target,
            integrity,
            files: report.file_count(),
        })
    }

    /// Whether `name` is recorded in the lock document and its directory exists.
    pub fn is_installed(&self, name: &str) -> bool {
        match self.lock.get_tool(name) {
            Ok(record) => self
                .install_path(name, record.tool_type)
                .map(|path| path.is_dir())
                .unwrap_or(false),
            Err(e) => {
                if !e.is_not_found() {
                    debug!(tool = name, error = %e, "could not read lock document");
                }
                false
            }
        }
    }

    pub fn list(&self) -> Result<BTreeMap<String, InstalledTool>> {
        self.lock.list_tools()
    }

    /// Lists locked tools whose latest registry version differs from the
    /// installed one.
    pub fn check_outdated(&self) -> Result<Vec<OutdatedTool>> {
        let registry = self.registry(false)?;
        let locked = self.lock.list_tools()?;
        Ok(outdated_tools(&registry, &locked))
    }

    /// Moves `name` to the registry's latest version.
    ///
    /// Returns [`UpdateOutcome::Skipped`] if it already is at that version.
    pub fn update(&self, name: &str) -> Result<UpdateResult> {
        let record = self.lock.get_tool(name)?;
        let registry = self.registry(false)?;
        let latest = registry
            .latest(name, record.tool_type)
            .ok_or_else(|| SatchelError::ToolNotFound { name: name.to_string() })?;

        if latest.version == record.version {
            return Ok(UpdateResult {
                name: name.to_string(),
                outcome: UpdateOutcome::Skipped,
                message: format!("already at {}", record.version),
            });
        }

        let latest = latest.clone();
        self.install_descriptor(&latest)?;
        Ok(UpdateResult {
            name: name.to_string(),
            outcome: UpdateOutcome::Updated,
            message: format!("{} -> {}", record.version, latest.version),
        })
    }

    /// Updates every outdated tool. A failing tool is recorded and the rest
    /// continue.
    pub fn update_all(&self) -> Result<(Vec<UpdateResult>, Vec<SatchelError>)> {
        self.update_all_with_cancel(&AtomicBool::new(false))
    }

    /// Like [`update_all`](Self::update_all), but stops before the next tool
    /// once `cancel` is set.
    pub fn update_all_with_cancel(
        &self,
        cancel: &AtomicBool,
    ) -> Result<(Vec<UpdateResult>, Vec<SatchelError>)> {
        let outdated = self.check_outdated()?;
        let mut results = Vec::with_capacity(outdated.len());
        let mut errors = Vec::new();

        for tool in outdated {
            if cancel.load(Ordering::SeqCst) {
                info!("update cancelled");
                break;
            }
            match self.update(&tool.name) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(tool = %tool.name, error = %e, "update failed");
                    results.push(UpdateResult {
                        name: tool.name.clone(),
                        outcome: UpdateOutcome::Failed,
                        message: e.to_string(),
                    });
                    errors.push(e);
                }
            }
        }
        Ok((results, errors))
    }

    /// Removes a tool's directory and then its lock record.
    pub fn uninstall(&self, name: &str) -> Result<InstalledTool> {
        let record = self.lock.get_tool(name)?;
        let path = self.install_path(name, record.tool_type)?;
        self.archiver.remove_dir(&path)?;
        let removed = self.lock.remove_tool(name)?;
        info!(tool = name, "uninstalled");
        Ok(removed)
    }
}

/// Compares locked versions against the registry's latest by string
/// inequality. Tools missing from the registry are not reported.
pub fn outdated_tools(
    registry: &RegistryDocument,
    locked: &BTreeMap<String, InstalledTool>,
) -> Vec<OutdatedTool> {
    locked
        .iter()
        .filter_map(|(name, record)| {
            let Some(latest) = registry.latest(name, record.tool_type) else {
                debug!(tool = %name, "not in registry");
                return None;
            };
            (latest.version != record.version).then(|| OutdatedTool {
                name: name.clone(),
                installed_version: record.version.clone(),
                latest_version: latest.version.clone(),
                tool_type: record.tool_type,
            })
        })
        .collect()
}

/// Replaces `target` with the extracted `staging` directory. A previous
/// installation is moved aside first and restored if the swap fails. If the
/// restore fails too, the moved-aside copy is kept and its location reported.
fn replace_dir<F>(staging: &Path, target: &Path, type_dir: &Path, rename: F) -> Result<()>
where
    F: Fn(&Path, &Path) -> std::io::Result<()>,
{
    let backup = if target.exists() {
        let backup = tempfile::Builder::new()
            .prefix(".previous-")
            .tempdir_in(type_dir)
            .map_err(|e| SatchelError::io(type_dir, e))?;
        let aside = backup.path().join("tool");
        rename(target, &aside).map_err(|e| SatchelError::io(target, e))?;
        Some((backup, aside))
    } else {
        None
    };

    let Err(swap_err) = rename(staging, target) else {
        // dropping the backup TempDir deletes the previous installation
        drop(backup);
        return Ok(());
    };
    let Some((backup, aside)) = backup else {
        return Err(SatchelError::io(target, swap_err));
    };
    match rename(&aside, target) {
        Ok(()) => {
            debug!(path = %target.display(), "restored previous installation");
            Err(SatchelError::io(target, swap_err))
        }
        Err(restore_err) => {
            let kept = backup.keep().join("tool");
            warn!(
                path = %target.display(),
                backup = %kept.display(),
                error = %restore_err,
                "could not restore previous installation"
            );
            Err(SatchelError::RestoreFailed {
                path: target.to_path_buf(),
                backup: kept,
                source: swap_err,
            })
        }
    }
}
