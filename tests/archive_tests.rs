use std::fs;
use std::io::Write;
use std::path::Path;
use satchel::archive::{ArchiveLimits, Archiver};
use satchel::{ErrorKind, SatchelError};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

fn write_zip(path: &Path, entries: &[(&str, &[u8])], method: CompressionMethod) {
    let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

fn assert_rejected_without_output(archiver: &Archiver, archive: &Path, dest: &Path) -> SatchelError {
    let err = archiver.extract(archive, dest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security, "unexpected error: {err}");
    assert!(!dest.exists(), "destination was created for a rejected archive");
    err
}

#[test]
fn test_create_and_extract_skip_dotfiles() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("nested")).unwrap();
    fs::create_dir_all(src.join(".git")).unwrap();
    fs::write(src.join("agent.md"), "# agent").unwrap();
    fs::write(src.join("nested").join("prompt.txt"), "hello").unwrap();
    fs::write(src.join("nested").join(".env"), "SECRET=1").unwrap();
    fs::write(src.join(".git").join("HEAD"), "ref").unwrap();

    let archiver = Archiver::new(dir.path()).unwrap();
    let archive = dir.path().join("tool.zip");
    let entries = archiver.create(&src, &archive).unwrap();
    // agent.md, nested/, nested/prompt.txt
    assert_eq!(entries, 3);

    let out = dir.path().join("out");
    let report = archiver.extract(&archive, &out).unwrap();
    assert_eq!(report.file_count(), 2);
    assert_eq!(fs::read_to_string(out.join("agent.md")).unwrap(), "# agent");
    assert_eq!(fs::read_to_string(out.join("nested").join("prompt.txt")).unwrap(), "hello");
    assert!(!out.join("nested").join(".env").exists());
    assert!(!out.join(".git").exists());
}

#[test]
fn test_created_archive_uses_forward_slashes() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("a").join("b")).unwrap();
    fs::write(src.join("a").join("b").join("c.txt"), "c").unwrap();

    let archiver = Archiver::new(dir.path()).unwrap();
    let archive = dir.path().join("tool.zip");
    archiver.create(&src, &archive).unwrap();

    let report = archiver.scan(&archive).unwrap();
    let names: Vec<&str> = report.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a/", "a/b/", "a/b/c.txt"]);
}

#[test]
fn test_traversal_entries_are_rejected() {
    for name in ["../evil.txt", "/abs.txt", "a/../../x.txt", "..\\win.txt"] {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("bad.zip");
        write_zip(
            &archive,
            &[("good.txt", &b"fine"[..]), (name, &b"pwned"[..])],
            CompressionMethod::Stored,
        );
        let archiver = Archiver::new(dir.path().join("root")).unwrap();
        let dest = dir.path().join("root").join("out");
        let err = assert_rejected_without_output(&archiver, &archive, &dest);
        assert!(matches!(err, SatchelError::PathTraversal { .. }), "{name}: {err}");
        assert!(!dir.path().join("evil.txt").exists());
    }
}

#[cfg(unix)]
#[test]
fn test_symlink_entries_are_rejected() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("link.zip");
    let mut zip = ZipWriter::new(fs::File::create(&archive).unwrap());
    zip.start_file("readme.md", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"hi").unwrap();
    zip.add_symlink("passwd", "/etc/passwd", SimpleFileOptions::default()).unwrap();
    zip.finish().unwrap();

    let archiver = Archiver::new(dir.path()).unwrap();
    let err = assert_rejected_without_output(&archiver, &archive, &dir.path().join("out"));
    assert!(matches!(err, SatchelError::SymlinkEntry { .. }));
}

#[test]
fn test_too_many_entries() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("many.zip");
    let names: Vec<String> = (0..10).map(|i| format!("file-{i}.txt")).collect();
    let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
    write_zip(&archive, &entries, CompressionMethod::Stored);

    let limits = ArchiveLimits { max_entries: 3, ..ArchiveLimits::default() };
    let archiver = Archiver::with_limits(dir.path(), limits).unwrap();
    let err = assert_rejected_without_output(&archiver, &archive, &dir.path().join("out"));
    assert!(matches!(err, SatchelError::TooManyEntries { count: 10, max: 3 }));
}

#[test]
fn test_oversized_entry() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("big.zip");
    write_zip(&archive, &[("big.bin", &[7u8; 80][..])], CompressionMethod::Stored);

    let limits = ArchiveLimits { max_file_size: 50, ..ArchiveLimits::default() };
    let archiver = Archiver::with_limits(dir.path(), limits).unwrap();
    let err = assert_rejected_without_output(&archiver, &archive, &dir.path().join("out"));
    assert!(matches!(err, SatchelError::EntryTooLarge { size: 80, max: 50, .. }));
}

/// Rewrites the declared uncompressed size of the first (and only) entry in
/// both its local header and its central directory record.
fn forge_uncompressed_size(path: &Path, declared: u32) {
    let mut bytes = fs::read(path).unwrap();
    assert_eq!(&bytes[..4], b"PK\x03\x04");
    bytes[22..26].copy_from_slice(&declared.to_le_bytes());

    // end-of-central-directory record without comment
    let eocd = bytes.len() - 22;
    assert_eq!(&bytes[eocd..eocd + 4], b"PK\x05\x06");
    let cd = u32::from_le_bytes(bytes[eocd + 16..eocd + 20].try_into().unwrap()) as usize;
    assert_eq!(&bytes[cd..cd + 4], b"PK\x01\x02");
    bytes[cd + 24..cd + 28].copy_from_slice(&declared.to_le_bytes());
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_lying_size_fields_are_caught_while_writing() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("liar.zip");
    let data: Vec<u8> = (0..1000u32).map(|i| (i * 7919 % 251) as u8).collect();
    write_zip(&archive, &[("blob.bin", &data[..])], CompressionMethod::Deflated);
    forge_uncompressed_size(&archive, 10);

    let limits = ArchiveLimits { max_file_size: 50, ..ArchiveLimits::default() };
    let archiver = Archiver::with_limits(dir.path(), limits).unwrap();

    // the declared sizes pass the pre-scan
    let report = archiver.scan(&archive).unwrap();
    assert_eq!(report.entries[0].size, 10);

    let out = dir.path().join("out");
    let err = archiver.extract(&archive, &out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    match &err {
        SatchelError::EntryTooLarge { entry, size, max } => {
            assert_eq!(entry, "blob.bin");
            assert_eq!(*max, 50);
            assert!(*size > 50, "reported size {size}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!out.join("blob.bin").exists(), "partial file was left behind");
}

#[test]
fn test_total_size_cap() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("total.zip");
    write_zip(
        &archive,
        &[("a.bin", &[1u8; 80][..]), ("b.bin", &[2u8; 80][..])],
        CompressionMethod::Stored,
    );

    let limits = ArchiveLimits { max_total_size: 100, ..ArchiveLimits::default() };
    let archiver = Archiver::with_limits(dir.path(), limits).unwrap();
    let err = assert_rejected_without_output(&archiver, &archive, &dir.path().join("out"));
    assert!(matches!(err, SatchelError::ArchiveTooLarge { max: 100, .. }));
}

#[test]
fn test_compression_bomb() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("bomb.zip");
    let zeros = vec![0u8; 10 * 1024 * 1024];
    write_zip(&archive, &[("zeros.bin", zeros.as_slice())], CompressionMethod::Deflated);

    let archiver = Archiver::new(dir.path()).unwrap();
    let err = assert_rejected_without_output(&archiver, &archive, &dir.path().join("out"));
    assert!(matches!(err, SatchelError::CompressionBomb { .. }));
}

#[test]
fn test_empty_archive() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("empty.zip");
    write_zip(&archive, &[], CompressionMethod::Stored);

    let archiver = Archiver::new(dir.path()).unwrap();
    let err = assert_rejected_without_output(&archiver, &archive, &dir.path().join("out"));
    assert!(matches!(err, SatchelError::EmptyArchive { .. }));
}

#[test]
fn test_extract_outside_base_is_rejected() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("ok.zip");
    write_zip(&archive, &[("a.txt", &b"a"[..])], CompressionMethod::Stored);

    let archiver = Archiver::new(dir.path().join("root")).unwrap();
    let err = archiver.extract(&archive, dir.path().join("elsewhere")).unwrap_err();
    assert!(matches!(err, SatchelError::OutsideBaseDir { .. }));
    assert!(!dir.path().join("elsewhere").exists());
}

#[test]
fn test_validate_path() {
    let dir = tempdir().unwrap();
    let archiver = Archiver::new(dir.path()).unwrap();
    let base = archiver.base_dir().to_path_buf();

    assert_eq!(archiver.validate_path("agents/tool").unwrap(), base.join("agents").join("tool"));
    assert_eq!(
        archiver.validate_path(base.join("a").join("..").join("b")).unwrap(),
        base.join("b")
    );
    assert_eq!(archiver.validate_path(&base).unwrap(), base);

    for bad in ["../outside", "agents/../../outside"] {
        let err = archiver.validate_path(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }
    assert!(archiver.validate_path("/etc/passwd").is_err());
}

#[test]
fn test_hash_and_verify() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("hello.txt");
    fs::write(&file, "hello world").unwrap();

    let archiver = Archiver::new(dir.path()).unwrap();
    let digest = archiver.hash(&file).unwrap();
    assert_eq!(digest, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");

    archiver.verify(&file, &digest).unwrap();
    archiver.verify(&file, &format!("sha256:{}", digest.to_uppercase())).unwrap();

    let err = archiver.verify(&file, &"0".repeat(64)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    match err {
        SatchelError::IntegrityMismatch { expected, actual, .. } => {
            assert_eq!(expected, "0".repeat(64));
            assert_eq!(actual, digest);
        }
        other => panic!("unexpected error: {other}"),
    }
}
