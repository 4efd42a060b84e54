//! On-disk cache for the registry document.
//!
//! The cache directory holds two files: the serialized [`RegistryDocument`]
//! and a sibling metadata file recording when it was cached and when it
//! expires. All access goes through one read-write lock, so readers never
//! observe a half-finished write from the same process.

use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{Result, SatchelError};
use crate::global::dirs::get_global_cache_dir;
use crate::registry::RegistryDocument;
use crate::util::write_atomic;

pub const REGISTRY_FILE: &str = "registry.json";
pub const METADATA_FILE: &str = "registry.meta.json";

/// Default time-to-live (1 hour).
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// Longest accepted time-to-live (10 years). Longer values are clamped.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 3600;

/// Bookkeeping written next to the cached document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// TTL in effect when the entry was written, in milliseconds.
    pub ttl_ms: i64,
    /// Validator token (e.g. an ETag) from the fetch that produced the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl CacheMetadata {
    fn new(cached_at: DateTime<Utc>, ttl: TimeDelta, etag: Option<String>) -> Self {
        let expires_at = cached_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            cached_at,
            expires_at,
            ttl_ms: ttl.num_milliseconds(),
            etag,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn ttl(&self) -> TimeDelta {
        TimeDelta::try_milliseconds(self.ttl_ms).unwrap_or(TimeDelta::zero())
    }
}

/// Snapshot of the cache state for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub metadata: CacheMetadata,
    pub expired: bool,
}

/// Time-limited cache for a single registry document.
pub struct RegistryCache {
    dir: PathBuf,
    ttl: RwLock<TimeDelta>,
}

impl RegistryCache {
    /// Opens (and creates) a cache in `dir`. A non-positive `ttl` falls back
    /// to [`DEFAULT_TTL_SECS`]; one above [`MAX_TTL_SECS`] is clamped.
    pub fn new<P: AsRef<Path>>(dir: P, ttl: TimeDelta) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| SatchelError::io(&dir, e))?;
        let ttl = if ttl > TimeDelta::zero() {
            clamp_ttl(ttl)
        } else {
            TimeDelta::seconds(DEFAULT_TTL_SECS)
        };
        Ok(Self { dir, ttl: RwLock::new(ttl) })
    }

    /// Opens the cache in `~/.satchel/cache` with the default TTL.
    pub fn open_default() -> Result<Self> {
        Self::new(get_global_cache_dir()?, TimeDelta::seconds(DEFAULT_TTL_SECS))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> TimeDelta {
        *self.ttl.read()
    }

    /// Changes the TTL used for subsequent writes. Non-positive values are
    /// ignored and values above [`MAX_TTL_SECS`] are clamped.
    pub fn set_ttl(&self, ttl: TimeDelta) {
        if ttl <= TimeDelta::zero() {
            debug!(ttl_ms = ttl.num_milliseconds(), "ignoring non-positive cache ttl");
            return;
        }
        *self.ttl.write() = clamp_ttl(ttl);
    }

    fn payload_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Returns the cached document if present and not expired.
    ///
    /// A missing entry is [`SatchelError::CacheMiss`]; an entry past its
    /// expiry is [`SatchelError::CacheExpired`].
    pub fn get(&self) -> Result<RegistryDocument> {
        let _guard = self.ttl.read();
        let metadata = self.read_metadata()?.ok_or(SatchelError::CacheMiss)?;
        if metadata.is_expired() {
            debug!(expired_at = %metadata.expires_at, "registry cache expired");
            return Err(SatchelError::CacheExpired { expired_at: metadata.expires_at });
        }
        let doc = self.read_payload()?;
        debug!(cached_at = %metadata.cached_at, "registry cache hit");
        Ok(doc)
    }

    /// Returns the cached document regardless of expiry.
    pub fn get_stale(&self) -> Result<RegistryDocument> {
        let _guard = self.ttl.read();
        if self.read_metadata()?.is_none() {
            return Err(SatchelError::CacheMiss);
        }
        self.read_payload()
    }

    /// Validates and stores `doc`, replacing any previous entry.
    pub fn set(&self, doc: &RegistryDocument) -> Result<()> {
        self.set_with_etag(doc, None)
    }

    /// Like [`set`](Self::set), recording a validator token from the fetch.
    ///
    /// An invalid document is rejected and the existing entry is kept.
    pub fn set_with_etag(&self, doc: &RegistryDocument, etag: Option<String>) -> Result<()> {
        doc.validate()?;
        let payload = serde_json::to_vec_pretty(doc)
            .map_err(|e| SatchelError::json(self.payload_path(), e))?;

        let ttl = self.ttl.write();
        let metadata = CacheMetadata::new(Utc::now(), *ttl, etag);
        let meta_bytes = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| SatchelError::json(self.metadata_path(), e))?;

        // Without metadata a half-replaced entry reads as a miss.
        remove_if_exists(&self.metadata_path())?;
        write_atomic(self.payload_path(), &payload)?;
        write_atomic(self.metadata_path(), &meta_bytes)?;
        debug!(tools = doc.tool_count(), expires_at = %metadata.expires_at, "registry cached");
        Ok(())
    }

    /// Whether a non-expired entry is present.
    pub fn is_valid(&self) -> bool {
        let _guard = self.ttl.read();
        match self.read_metadata() {
            Ok(Some(metadata)) => !metadata.is_expired() && self.payload_path().is_file(),
            _ => false,
        }
    }

    pub fn metadata(&self) -> Result<Option<CacheMetadata>> {
        let _guard = self.ttl.read();
        self.read_metadata()
    }

    pub fn status(&self) -> Result<Option<CacheStatus>> {
        Ok(self.metadata()?.map(|metadata| CacheStatus {
            expired: metadata.is_expired(),
            metadata,
        }))
    }

    /// Drops the cached document and its metadata. Idempotent.
    pub fn invalidate(&self) -> Result<()> {
        let _guard = self.ttl.write();
        remove_if_exists(&self.metadata_path())?;
        remove_if_exists(&self.payload_path())?;
        debug!("registry cache invalidated");
        Ok(())
    }

    /// Removes everything in the cache directory.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.ttl.write();
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| SatchelError::io(&self.dir, e))?;
        }
        fs::create_dir_all(&self.dir).map_err(|e| SatchelError::io(&self.dir, e))?;
        Ok(())
    }

    fn read_metadata(&self) -> Result<Option<CacheMetadata>> {
        let path = self.metadata_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SatchelError::io(&path, e)),
        };
        let metadata = serde_json::from_slice(&bytes).map_err(|e| SatchelError::json(&path, e))?;
        Ok(Some(metadata))
    }

    fn read_payload(&self) -> Result<RegistryDocument> {
        let path = self.payload_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(SatchelError::CacheMiss),
            Err(e) => return Err(SatchelError::io(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| SatchelError::json(&path, e))
    }
}

fn clamp_ttl(ttl: TimeDelta) -> TimeDelta {
    ttl.min(TimeDelta::seconds(MAX_TTL_SECS))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SatchelError::io(path, e)),
    }
}
