//! The lock document (`satchel-lock.json`) records what is installed.
//!
//! It is the single source of truth for installed tools. Every mutation loads
//! the whole document, applies one change, validates the result and rewrites
//! the file through a temp-file-and-rename, so the file on disk is always a
//! complete document.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{Result, SatchelError};
use crate::registry::ToolType;
use crate::util::{next_timestamp, validate_tool_name, write_atomic};

/// Current lock document format.
pub const LOCK_VERSION: &str = "1.0";

/// Provenance label for tools installed from the registry.
pub const REGISTRY_SOURCE: &str = "registry";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstalledTool {
    pub version: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub installed_at: DateTime<Utc>,
    /// Where the tool came from: `registry` or an explicit source string.
    pub source: String,
    /// SHA-256 of the archive the tool was extracted from.
    #[serde(default)]
    pub integrity: String,
}

impl InstalledTool {
    pub fn new(version: &str, tool_type: ToolType, source: &str, integrity: &str) -> Self {
        Self {
            version: version.to_string(),
            tool_type,
            installed_at: Utc::now(),
            source: source.to_string(),
            integrity: integrity.to_string(),
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: &str| SatchelError::InvalidRecord {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if self.version.trim().is_empty() {
            return Err(invalid("version is empty"));
        }
        if self.source.trim().is_empty() {
            return Err(invalid("source is empty"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LockDocument {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    /// Registry the tools were installed from.
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub tools: BTreeMap<String, InstalledTool>,
}

impl LockDocument {
    pub fn new(registry: &str) -> Self {
        Self {
            version: LOCK_VERSION.to_string(),
            updated_at: Utc::now(),
            registry: registry.to_string(),
            tools: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(SatchelError::InvalidRecord {
                name: String::from("<lock>"),
                reason: "lock version is empty".to_string(),
            });
        }
        for (name, record) in &self.tools {
            validate_tool_name(name)?;
            record.validate(name)?;
        }
        Ok(())
    }
}

/// Reads and rewrites the lock document.
///
/// Mutations are serialized by an in-process mutex around the
/// read-modify-write cycle, so concurrent installs cannot lose each other's
/// records.
pub struct LockStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LockStore {
    /// Handle to the lock document at `path`. Nothing is read or written.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates the parent directory and an empty document if none exists.
    pub fn init<P: AsRef<Path>>(path: P, registry: &str) -> Result<Self> {
        let store = Self::new(path);
        if let Some(parent) = store.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SatchelError::io(parent, e))?;
            }
        }
        if !store.path.exists() {
            store.save(&LockDocument::new(registry))?;
            debug!(path = %store.path.display(), "created lock document");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the document. A missing file reads as an empty document.
    pub fn load(&self) -> Result<LockDocument> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LockDocument::new(""));
            }
            Err(e) => return Err(SatchelError::io(&self.path, e)),
        };
        let doc: LockDocument =
            serde_json::from_slice(&bytes).map_err(|e| SatchelError::json(&self.path, e))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Adds `record` under `name`, replacing an existing record.
    pub fn add_tool(&self, name: &str, record: InstalledTool) -> Result<()> {
        self.mutate(|doc| {
            doc.tools.insert(name.to_string(), record);
            Ok(())
        })
    }

    /// Adds `record` and notes `registry` as the document's source in a
    /// single rewrite.
    pub fn add_tool_from(&self, name: &str, record: InstalledTool, registry: &str) -> Result<()> {
        self.mutate(|doc| {
            doc.registry = registry.to_string();
            doc.tools.insert(name.to_string(), record);
            Ok(())
        })
    }

    /// Removes and returns the record for `name`.
    pub fn remove_tool(&self, name: &str) -> Result<InstalledTool> {
        self.mutate(|doc| {
            doc.tools
                .remove(name)
                .ok_or_else(|| SatchelError::NotInstalled { name: name.to_string() })
        })
    }

    /// Replaces the record for an already locked `name`.
    pub fn update_tool(&self, name: &str, record: InstalledTool) -> Result<()> {
        self.mutate(|doc| match doc.tools.get_mut(name) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(SatchelError::NotInstalled { name: name.to_string() }),
        })
    }

    pub fn get_tool(&self, name: &str) -> Result<InstalledTool> {
        self.load()?
            .tools
            .remove(name)
            .ok_or_else(|| SatchelError::NotInstalled { name: name.to_string() })
    }

    pub fn list_tools(&self) -> Result<BTreeMap<String, InstalledTool>> {
        Ok(self.load()?.tools)
    }

    fn mutate<T>(&self, change: impl FnOnce(&mut LockDocument) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut doc = self.load()?;
        let out = change(&mut doc)?;
        doc.updated_at = next_timestamp(Some(doc.updated_at));
        doc.validate()?;
        self.save(&doc)?;
        Ok(out)
    }

    fn save(&self, doc: &LockDocument) -> Result<()> {
        let mut content =
            serde_json::to_vec_pretty(doc).map_err(|e| SatchelError::json(&self.path, e))?;
        content.push(b'\n');
        write_atomic(&self.path, &content)?;
        debug!(path = %self.path.display(), tools = doc.tools.len(), "lock document written");
        Ok(())
    }
}
