use std::path::Path;
use std::time::Duration;
use reqwest::blocking::Client;
use tracing::debug;
use crate::error::{Result, SatchelError};

/// Default HTTP request timeout (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Source of registry documents and tool archives.
///
/// Authentication, retries and rate limiting are the implementor's concern;
/// any failure is reported as [`SatchelError::FetchFailed`].
pub trait Fetcher: Send + Sync {
    /// Raw bytes of the registry document.
    fn fetch_registry_document(&self) -> Result<Vec<u8>>;

    /// Raw bytes of the archive at `location`, as named by a descriptor.
    fn fetch_archive(&self, location: &str) -> Result<Vec<u8>>;

    /// Identity of the registry, recorded in the lock document.
    fn registry_identity(&self) -> String;
}

/// Fetches over HTTP(S), or from disk for `file://` and plain paths.
///
/// Relative archive locations are resolved against the directory of the
/// registry document. Only a registry that is itself on disk may point at
/// absolute paths or `file://` URLs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    registry_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Http,
    File,
    Path,
    Unsupported,
}

fn scheme_of(location: &str) -> Scheme {
    if location.starts_with("http://") || location.starts_with("https://") {
        Scheme::Http
    } else if location.starts_with("file://") {
        Scheme::File
    } else if location.contains("://") {
        Scheme::Unsupported
    } else {
        Scheme::Path
    }
}

impl HttpFetcher {
    pub fn new(registry_url: &str) -> Result<Self> {
        Self::with_timeout(registry_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(registry_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("satchel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SatchelError::FetchFailed {
                location: registry_url.to_string(),
                reason: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            registry_url: registry_url.to_string(),
        })
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Whether the registry document is read from disk.
    pub fn is_local(&self) -> bool {
        matches!(scheme_of(&self.registry_url), Scheme::File | Scheme::Path)
    }

    /// Turns a descriptor's archive location into something fetchable.
    ///
    /// # Errors
    /// [`SatchelError::FetchFailed`] for unknown schemes, and for absolute
    /// paths or `file://` URLs named by a remote registry.
    pub fn resolve_location(&self, location: &str) -> Result<String> {
        let rejected = |reason: &str| SatchelError::FetchFailed {
            location: location.to_string(),
            reason: reason.to_string(),
        };
        match scheme_of(location) {
            Scheme::Http => Ok(location.to_string()),
            Scheme::Unsupported => Err(rejected("unsupported scheme")),
            Scheme::File | Scheme::Path
                if location.starts_with("file://") || Path::new(location).is_absolute() =>
            {
                if self.is_local() {
                    Ok(location.to_string())
                } else {
                    Err(rejected("remote registry may not name local files"))
                }
            }
            _ => Ok(match self.registry_url.rfind('/') {
                Some(idx) => format!(
                    "{}/{}",
                    &self.registry_url[..idx],
                    location.trim_start_matches("./")
                ),
                None => location.to_string(),
            }),
        }
    }

    fn get(&self, location: &str) -> Result<Vec<u8>> {
        let failed = |reason: String| SatchelError::FetchFailed {
            location: location.to_string(),
            reason,
        };

        match scheme_of(location) {
            Scheme::Http => {}
            Scheme::Unsupported => return Err(failed("unsupported scheme".to_string())),
            Scheme::File | Scheme::Path => {
                let path = location.strip_prefix("file://").unwrap_or(location);
                debug!(path, "reading from disk");
                return std::fs::read(path).map_err(|e| failed(e.to_string()));
            }
        }

        debug!(url = location, "fetching");
        let response = self.client.get(location).send().map_err(|e| {
            if e.is_timeout() {
                failed("request timed out".to_string())
            } else {
                failed(e.to_string())
            }
        })?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let bytes = response.bytes().map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_registry_document(&self) -> Result<Vec<u8>> {
        self.get(&self.registry_url)
    }

    fn fetch_archive(&self, location: &str) -> Result<Vec<u8>> {
        self.get(&self.resolve_location(location)?)
    }

    fn registry_identity(&self) -> String {
        self.registry_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_location() {
        let fetcher = HttpFetcher::new("https://example.com/registry/registry.json").unwrap();
        assert!(!fetcher.is_local());
        assert_eq!(
            fetcher.resolve_location("agents/a.zip").unwrap(),
            "https://example.com/registry/agents/a.zip"
        );
        assert_eq!(
            fetcher.resolve_location("./agents/a.zip").unwrap(),
            "https://example.com/registry/agents/a.zip"
        );
        assert_eq!(
            fetcher.resolve_location("https://cdn.example.com/a.zip").unwrap(),
            "https://cdn.example.com/a.zip"
        );
    }

    #[test]
    fn test_remote_registry_cannot_name_local_files() {
        let fetcher = HttpFetcher::new("https://example.com/registry.json").unwrap();
        for location in ["/etc/passwd", "file:///etc/passwd", "ftp://example.com/a.zip"] {
            let err = fetcher.resolve_location(location).unwrap_err();
            assert!(
                matches!(&err, SatchelError::FetchFailed { location: l, .. } if l == location),
                "unexpected error for {location}: {err}"
            );
            let err = fetcher.fetch_archive(location).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Fetch);
        }
    }

    #[test]
    fn test_unknown_scheme_is_rejected_everywhere() {
        let dir = tempdir().unwrap();
        let fetcher = HttpFetcher::new(&dir.path().join("registry.json").display().to_string()).unwrap();
        assert!(fetcher.is_local());
        assert!(fetcher.resolve_location("ftp://example.com/a.zip").is_err());
        assert!(fetcher.resolve_location("s3://bucket/a.zip").is_err());

        let fetcher = HttpFetcher::new("ftp://example.com/registry.json").unwrap();
        assert!(!fetcher.is_local());
        let err = fetcher.fetch_registry_document().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }

    #[test]
    fn test_local_registry_reads_absolute_locations() {
        let dir = tempdir().unwrap();
        let registry = dir.path().join("registry.json");
        std::fs::write(&registry, b"{}").unwrap();
        let archive = dir.path().join("elsewhere.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let fetcher = HttpFetcher::new(&registry.display().to_string()).unwrap();
        let absolute = archive.display().to_string();
        assert_eq!(fetcher.fetch_archive(&absolute).unwrap(), b"zip");
        assert_eq!(fetcher.fetch_archive(&format!("file://{absolute}")).unwrap(), b"zip");
    }

    #[test]
    fn test_fetches_from_disk() {
        let dir = tempdir().unwrap();
        let registry = dir.path().join("registry.json");
        std::fs::write(&registry, b"{}").unwrap();
        std::fs::create_dir(dir.path().join("agents")).unwrap();
        std::fs::write(dir.path().join("agents").join("a.zip"), b"zip").unwrap();

        let fetcher = HttpFetcher::new(&format!("file://{}", registry.display())).unwrap();
        assert_eq!(fetcher.fetch_registry_document().unwrap(), b"{}");
        assert_eq!(fetcher.fetch_archive("agents/a.zip").unwrap(), b"zip");
    }

    #[test]
    fn test_missing_file_is_fetch_failure() {
        let dir = tempdir().unwrap();
        let fetcher = HttpFetcher::new(&dir.path().join("nope.json").display().to_string()).unwrap();
        let err = fetcher.fetch_registry_document().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }
}
