use std::path::{Path, PathBuf};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use crate::archive::ArchiveLimits;
use crate::error::{Result, SatchelError};
use crate::global::cache::{DEFAULT_TTL_SECS, MAX_TTL_SECS};
use crate::global::dirs::get_global_cache_dir;

pub const DEFAULT_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/satchel-dev/registry/main/registry.json";

/// Represents the contents of a `satchel.toml` file.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Where the registry document is fetched from.
    pub registry_url: String,
    /// Overrides `~/.satchel/cache`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Lifetime of a cached registry document in seconds.
    pub cache_ttl_secs: i64,
    /// Resource limits applied to every archive.
    pub archive: ArchiveLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            cache_dir: None,
            cache_ttl_secs: DEFAULT_TTL_SECS,
            archive: ArchiveLimits::default(),
        }
    }
}

impl Settings {
    /// Loads `Settings` from a file path.
    ///
    /// # Errors
    /// Returns an error if the file can't be read or deserialized.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SatchelError::io(path, e))?;
        toml::from_str(&content).map_err(|e| SatchelError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Settings> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Settings::default())
        }
    }

    /// Saves the settings in pretty TOML format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| SatchelError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| SatchelError::io(path, e))
    }

    /// Cache TTL. Non-positive values fall back to the default and values
    /// above [`MAX_TTL_SECS`] are clamped.
    pub fn cache_ttl(&self) -> TimeDelta {
        let secs = if self.cache_ttl_secs > 0 {
            self.cache_ttl_secs.min(MAX_TTL_SECS)
        } else {
            DEFAULT_TTL_SECS
        };
        TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::hours(1))
    }

    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_global_cache_dir(),
        }
    }
}
