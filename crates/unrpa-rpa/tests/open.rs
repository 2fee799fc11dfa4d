mod common;

use std::fs;
use std::io::Cursor;

use tempfile::TempDir;
use unrpa_rpa::{read_index, Error, RpaArchive, Version};

use common::{zlib, ArchiveBuilder};

#[test]
fn test_unknown_header_needs_forced_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mystery.rpa");
    fs::write(&path, b"PK\x03\x04 not an rpa archive").unwrap();

    let err = RpaArchive::open(&path).unwrap_err();

    assert!(matches!(err, Error::UnknownVersion { .. }));
    assert!(err.hint().is_some());
}

#[test]
fn test_unknown_extension() {
    let dir = TempDir::new().unwrap();
    let path = ArchiveBuilder::v3(1).file("a", b"a").write_to(dir.path(), "archive.zip");

    assert!(matches!(
        RpaArchive::open(&path),
        Err(Error::UnknownVersion { .. })
    ));

    // Forcing the version reads it anyway
    let archive = RpaArchive::open_as(&path, Version::V3).unwrap();
    assert_eq!(archive.len(), 1);
}

#[test]
fn test_index_only_file_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.rpi");
    fs::write(&path, zlib(b"}.")).unwrap();

    assert!(matches!(
        RpaArchive::open(&path),
        Err(Error::UnsupportedVersion(Version::V1))
    ));
}

#[test]
fn test_forced_version_mismatch_is_format_error() {
    let dir = TempDir::new().unwrap();
    let path = ArchiveBuilder::v2().file("a", b"a").write_to(dir.path(), "v2.rpa");

    // The v2 header has no key field
    assert!(matches!(
        RpaArchive::open_as(&path, Version::V3),
        Err(Error::Format(_))
    ));
}

#[test]
fn test_forced_v2_on_garbage_is_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.rpa");
    fs::write(&path, b"RPA-9.9 not hex at all\n").unwrap();

    assert!(matches!(
        RpaArchive::open_as(&path, Version::V2),
        Err(Error::Format(_))
    ));
}

#[test]
fn test_corrupt_index_is_format_error() {
    let mut bytes = b"RPA-2.0 0000000000000019\n".to_vec();
    bytes.extend_from_slice(b"this is not a zlib stream");

    let result = read_index(&mut Cursor::new(bytes), Version::V2);

    assert!(matches!(result, Err(Error::Format(_))));
}

#[test]
fn test_read_index_from_memory() {
    let bytes = ArchiveBuilder::v3(0xabcdef)
        .file("x.txt", b"xx")
        .build();

    let index = read_index(&mut Cursor::new(bytes), Version::V3).unwrap();

    let record = &index.get("x.txt").unwrap()[0];
    assert_eq!(record.length, 2);
    assert!(record.start.is_empty());
}
