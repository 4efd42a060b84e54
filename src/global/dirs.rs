use std::path::{Path, PathBuf};
use directories::BaseDirs;
use crate::error::{Result, SatchelError};

/// Dot-directory used both under the user's home and inside a project.
pub const APP_DIR: &str = ".satchel";
pub const LOCK_FILE: &str = "satchel-lock.json";
pub const SETTINGS_FILE: &str = "satchel.toml";

pub fn get_home_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().ok_or_else(|| SatchelError::Config {
        path: PathBuf::from("~"),
        reason: "could not determine the home directory".to_string(),
    })?;
    Ok(base.home_dir().to_path_buf())
}

/// `~/.satchel`
pub fn get_global_dir() -> Result<PathBuf> {
    Ok(get_home_dir()?.join(APP_DIR))
}

/// `~/.satchel/cache`
pub fn get_global_cache_dir() -> Result<PathBuf> {
    Ok(get_global_dir()?.join("cache"))
}

/// `<project>/.satchel`, the root all tools install under.
pub fn get_install_dir<P: AsRef<Path>>(project_root: P) -> PathBuf {
    project_root.as_ref().join(APP_DIR)
}

pub fn get_lock_file<P: AsRef<Path>>(project_root: P) -> PathBuf {
    project_root.as_ref().join(LOCK_FILE)
}

pub fn get_settings_file<P: AsRef<Path>>(project_root: P) -> PathBuf {
    project_root.as_ref().join(SETTINGS_FILE)
}
