use std::cmp::Ordering;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use semver::Version;
use crate::error::{Result, SatchelError};

/// Longest tool name accepted; names become directory names.
pub const MAX_TOOL_NAME_LEN: usize = 64;

static TOOL_NAME: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$"));

/// Strips the `sha256:` prefix from a hash if present and lowercases it.
/// This is useful for formatting hashes uniformly.
pub fn format_hash(hash: &str) -> String {
    let hash = hash.trim();
    hash.strip_prefix("sha256:").unwrap_or(hash).to_ascii_lowercase()
}

fn parse_version(version: &str) -> Option<Version> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    Version::parse(version).ok()
}

/// Orders two version strings.
///
/// Two valid SemVer versions compare by SemVer precedence. Anything else
/// falls back to plain string ordering, with valid versions sorting after
/// invalid ones.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Checks a tool name against the allowed pattern.
pub fn validate_tool_name(name: &str) -> Result<()> {
    let matches = TOOL_NAME
        .as_ref()
        .is_ok_and(|re| re.is_match(name));
    if !matches || name.len() > MAX_TOOL_NAME_LEN {
        return Err(SatchelError::InvalidToolName(name.to_string()));
    }
    Ok(())
}

/// Splits `<name>@<version>` into its parts. The version is optional.
pub fn parse_tool_ref(tool_ref: &str) -> Result<(String, Option<String>)> {
    let (name, version) = match tool_ref.split_once('@') {
        Some((name, version)) => {
            if version.is_empty() || version.contains('@') {
                return Err(SatchelError::InvalidToolRef(tool_ref.to_string()));
            }
            (name, Some(version.to_string()))
        }
        None => (tool_ref, None),
    };
    validate_tool_name(name)?;
    Ok((name.to_string(), version))
}

/// Returns a timestamp strictly later than `previous`.
///
/// Normally this is just `Utc::now()`; when the clock has not advanced past
/// `previous` (coarse clocks, fast successive writes) it is nudged forward by
/// one nanosecond.
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::nanoseconds(1),
        _ => now,
    }
}

/// Writes `bytes` to `path` through a temporary file in the same directory
/// that is synced and then renamed over the target.
///
/// Readers observe either the old or the new content, never a mixture. The
/// parent directory must already exist.
pub fn write_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| SatchelError::io(parent, e))?;
    tmp.write_all(bytes).map_err(|e| SatchelError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| SatchelError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| SatchelError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_format_hash_removes_prefix() {
        let input = "sha256:abcdef123456";
        let expected = "abcdef123456";
        assert_eq!(format_hash(input), expected);
    }

    #[test]
    fn test_format_hash_without_prefix() {
        let input = "abcdef123456";
        assert_eq!(format_hash(input), input);
    }

    #[test]
    fn test_format_hash_lowercases() {
        assert_eq!(format_hash("sha256:ABCDEF"), "abcdef");
    }

    #[test]
    fn test_compare_versions_uses_semver() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("v1.0.0", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_compare_versions_ranks_semver_above_garbage() {
        // "1.2" is incomplete semver
        assert_eq!(compare_versions("1.2", "0.0.1"), Ordering::Less);
        assert_eq!(compare_versions("not-a-version", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("b", "a"), Ordering::Greater);
    }

    #[test]
    fn test_compare_versions_falls_back_to_strings() {
        assert_eq!(compare_versions("1.0", "1.1"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0", "latest"), Ordering::Greater);
    }

    #[test]
    fn test_validate_tool_name() {
        assert!(validate_tool_name("code-reviewer").is_ok());
        assert!(validate_tool_name("tool_a.v2").is_ok());
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("../etc").is_err());
        assert!(validate_tool_name("Upper").is_err());
        assert!(validate_tool_name("a/b").is_err());
        assert!(validate_tool_name(&"x".repeat(MAX_TOOL_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_parse_tool_ref() {
        assert_eq!(parse_tool_ref("tool-a").unwrap(), ("tool-a".to_string(), None));
        assert_eq!(
            parse_tool_ref("tool-a@1.0.0").unwrap(),
            ("tool-a".to_string(), Some("1.0.0".to_string()))
        );
        assert!(parse_tool_ref("tool-a@").is_err());
        assert!(parse_tool_ref("tool-a@1@2").is_err());
        assert!(parse_tool_ref("@1.0.0").is_err());
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let future = Utc::now() + TimeDelta::seconds(60);
        let next = next_timestamp(Some(future));
        assert!(next > future);

        let mut prev = next_timestamp(None);
        for _ in 0..100 {
            let next = next_timestamp(Some(prev));
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_atomic_requires_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("doc.json");
        let err = write_atomic(&path, b"x").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }
}
