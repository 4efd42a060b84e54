use std::path::PathBuf;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type used throughout the `satchel` library.
pub type Result<T> = std::result::Result<T, SatchelError>;

/// Broad classification of a [`SatchelError`].
///
/// Callers use this to decide how to react (retry, refresh, report) without
/// matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A document, descriptor, record or name violated its invariants.
    Validation,
    /// An archive failed a pre-scan check, or a path escaped its base directory.
    Security,
    /// A computed digest did not match the expected one.
    Integrity,
    /// A tool, version, lock entry or cache entry does not exist.
    NotFound,
    /// A mutation only partially completed.
    State,
    /// The remote fetch collaborator failed.
    Fetch,
    /// Filesystem or encoding failure.
    Io,
}

#[derive(Debug, Error)]
pub enum SatchelError {
    // validation
    #[error("invalid registry document: {reason}")]
    InvalidDocument { reason: String },

    #[error("invalid descriptor for tool '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("invalid lock record for tool '{name}': {reason}")]
    InvalidRecord { name: String, reason: String },

    #[error("invalid tool name '{0}'")]
    InvalidToolName(String),

    #[error("invalid tool reference '{0}', expected <name> or <name>@<version>")]
    InvalidToolRef(String),

    #[error("tool '{name}' exists under several types ({types}), specify one")]
    AmbiguousTool { name: String, types: String },

    // security
    #[error("archive {path:?} contains no entries")]
    EmptyArchive { path: PathBuf },

    #[error("archive has {count} entries, limit is {max}")]
    TooManyEntries { count: usize, max: usize },

    #[error("archive entry '{entry}' escapes the extraction directory")]
    PathTraversal { entry: String },

    #[error("archive entry '{entry}' is a symbolic link")]
    SymlinkEntry { entry: String },

    #[error("archive entry '{entry}' is {size} bytes, limit is {max}")]
    EntryTooLarge { entry: String, size: u64, max: u64 },

    #[error("archive expands to {total} bytes, limit is {max}")]
    ArchiveTooLarge { total: u64, max: u64 },

    #[error("archive compression ratio {ratio:.1}:1 exceeds {max:.1}:1")]
    CompressionBomb { ratio: f64, max: f64 },

    #[error("path {path:?} is outside of {base:?}")]
    OutsideBaseDir { path: PathBuf, base: PathBuf },

    // integrity
    #[error("integrity mismatch for {path:?}: expected {expected}, got {actual}")]
    IntegrityMismatch { path: PathBuf, expected: String, actual: String },

    // not found
    #[error("tool '{name}' not found in registry")]
    ToolNotFound { name: String },

    #[error("version {version} of tool '{name}' not found in registry")]
    VersionNotFound { name: String, version: String },

    #[error("tool '{name}' is not installed")]
    NotInstalled { name: String },

    #[error("no cached registry")]
    CacheMiss,

    #[error("cached registry expired at {expired_at}")]
    CacheExpired { expired_at: DateTime<Utc> },

    // state
    #[error("tool '{name}' was extracted to {path:?} but could not be recorded: {source}")]
    PartialInstall {
        name: String,
        path: PathBuf,
        #[source]
        source: Box<SatchelError>,
    },

    #[error("could not replace {path:?} ({source}) nor restore it, previous install kept at {backup:?}")]
    RestoreFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // fetch
    #[error("fetch of {location} failed: {reason}")]
    FetchFailed { location: String, reason: String },

    // io
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid configuration {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl SatchelError {
    pub fn kind(&self) -> ErrorKind {
        use SatchelError::*;
        match self {
            InvalidDocument { .. }
            | InvalidDescriptor { .. }
            | InvalidRecord { .. }
            | InvalidToolName(_)
            | InvalidToolRef(_)
            | AmbiguousTool { .. } => ErrorKind::Validation,
            EmptyArchive { .. }
            | TooManyEntries { .. }
            | PathTraversal { .. }
            | SymlinkEntry { .. }
            | EntryTooLarge { .. }
            | ArchiveTooLarge { .. }
            | CompressionBomb { .. }
            | OutsideBaseDir { .. } => ErrorKind::Security,
            IntegrityMismatch { .. } => ErrorKind::Integrity,
            ToolNotFound { .. }
            | VersionNotFound { .. }
            | NotInstalled { .. }
            | CacheMiss
            | CacheExpired { .. } => ErrorKind::NotFound,
            PartialInstall { .. } | RestoreFailed { .. } => ErrorKind::State,
            FetchFailed { .. } => ErrorKind::Fetch,
            Io { .. } | Json { .. } | Zip(_) | Config { .. } => ErrorKind::Io,
        }
    }

    /// Shorthand for wrapping an [`std::io::Error`] with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SatchelError::Io { path: path.into(), source }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        SatchelError::Json { path: path.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
