use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use sha2::{Digest, Sha256};
use crate::error::{Result, SatchelError};
use crate::util::format_hash;

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes the SHA-256 digest of a file as lowercase hex, streaming the
/// content in fixed-size chunks.
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| SatchelError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|e| SatchelError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize().as_slice()))
}

/// SHA-256 of an in-memory buffer as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize().as_slice())
}

/// Recomputes the digest of `path` and compares it with `expected`.
///
/// The comparison ignores case and an optional `sha256:` prefix. A differing
/// digest is reported as [`SatchelError::IntegrityMismatch`]; failing to read
/// the file is an I/O error.
pub fn verify_file<P: AsRef<Path>>(path: P, expected: &str) -> Result<()> {
    let path = path.as_ref();
    let actual = hash_file(path)?;
    let expected = format_hash(expected);
    if actual.eq_ignore_ascii_case(&expected) {
        Ok(())
    } else {
        Err(SatchelError::IntegrityMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        })
    }
}
