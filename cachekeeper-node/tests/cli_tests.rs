//! # CLI Integration Tests
//!
//! cachekeeper-node 命令行集成测试

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("cachekeeper-node").expect("binary should build");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn test_validate_accepts_good_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("caches.json");
    fs::write(
        &path,
        r#"{"instances": {"user": {"max_size": 500, "default_ttl_ms": 60000}}}"#,
    )
    .unwrap();

    cli()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("user"))
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn test_validate_rejects_zero_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("caches.yaml");
    fs::write(&path, "instances:\n  api:\n    max_size: 0\n").unwrap();

    cli()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("INVALID"))
        .stderr(predicate::str::contains("rejected"));
}

#[test]
fn test_export_presets_as_toml() {
    cli()
        .args(["export", "--format", "toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[instances.session]"))
        .stdout(predicate::str::contains("max_size = 5000"));
}

#[test]
fn test_export_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("caches.json");
    let target = dir.path().join("caches.env");
    fs::write(&source, r#"{"instances": {"catalog": {"max_size": 42}}}"#).unwrap();

    cli()
        .args(["export", "--format", "env", "--config"])
        .arg(&source)
        .arg("--output")
        .arg(&target)
        .assert()
        .success();

    let text = fs::read_to_string(&target).unwrap();
    assert!(text.contains("CACHE_CATALOG_MAX_SIZE=42"));
}
