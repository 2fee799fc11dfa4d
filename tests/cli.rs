//! Integration tests for the unrpa binary

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use predicates::prelude::*;
use tempfile::TempDir;

/// Write a v2 archive holding `a.txt` with the contents `hi`.
fn write_archive(dir: &Path) -> PathBuf {
    // {"a.txt": [(25, 2)]} at protocol 2
    let pickle = b"\x80\x02}X\x05\x00\x00\x00a.txt]K\x19K\x02\x86as.";
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(pickle).unwrap();

    let mut bytes = b"RPA-2.0 000000000000001b\n".to_vec();
    bytes.extend_from_slice(b"hi");
    bytes.extend_from_slice(&encoder.finish().unwrap());

    let path = dir.join("game.rpa");
    fs::write(&path, bytes).unwrap();
    path
}

fn unrpa() -> Command {
    let mut cmd = Command::cargo_bin("unrpa").unwrap();
    cmd.env_remove("UNRPA_OUTPUT").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_list_prints_paths() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path());

    unrpa()
        .arg("-l")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("a.txt"));
}

#[test]
fn test_list_ignores_output_from_env() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path());

    unrpa()
        .env("UNRPA_OUTPUT", dir.path().join("unused"))
        .arg("-l")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("a.txt"));

    assert!(!dir.path().join("unused").exists());
}

#[test]
fn test_list_rejects_explicit_path() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path());

    unrpa()
        .args(["-l", "-p", "out"])
        .arg(&archive)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_extract_to_env_destination() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    unrpa()
        .env("UNRPA_OUTPUT", &out)
        .arg("-s")
        .arg(&archive)
        .assert()
        .success();

    assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"hi");
}

#[test]
fn test_extract_missing_destination_fails() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path());

    unrpa()
        .arg("-p")
        .arg(dir.path().join("missing"))
        .arg(&archive)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--mkdir"));
}
