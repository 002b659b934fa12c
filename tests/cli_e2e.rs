//! End-to-end tests for the `layerpin` binary.
//!
//! The configurations here only declare local repositories (no url), so
//! no VCS tool is run beyond root detection and no network is touched.

mod common;

use common::prelude::*;

const BASE: &str = "header:
  version: 11
machine: qemux86-64
distro: poky
repos:
  meta-custom:
    layers:
      meta-foo:
      meta-bar: disabled
local_conf_header:
  standard: |
    CONF_VERSION = \"2\"
";

const BOARD: &str = "header:
  version: 14
machine: qemuarm64
";

fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    temp.child("base.yml").write_str(BASE).unwrap();
    temp.child("board.yml").write_str(BOARD).unwrap();
    temp
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("checkout"))
        .stdout(predicate::str::contains("dump"))
        .stdout(predicate::str::contains("lock"))
        .stdout(predicate::str::contains("repos"));
}

#[test]
fn test_version() {
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_files_argument_is_a_usage_error() {
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.arg("dump").assert().code(2);
}

#[test]
fn test_missing_config_file_exits_with_error() {
    let temp = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .args(["--color", "never", "dump", "nope.yml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[ERROR]"))
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_invalid_yaml_exits_with_error() {
    let temp = TempDir::new().unwrap();
    temp.child("bad.yml")
        .write_str("header:\n  version: 14\nrepos: [unclosed\n")
        .unwrap();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .args(["--color", "never", "dump", "bad.yml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bad.yml"))
        .stderr(predicate::str::contains("panicked").not());
}

#[test]
fn test_unsupported_version_exits_with_error() {
    let temp = TempDir::new().unwrap();
    temp.child("old.yml")
        .write_str("header:\n  version: 15\n")
        .unwrap();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .args(["--color", "never", "dump", "old.yml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("old.yml"));
}

#[test]
fn test_dump_yaml_merges_in_order() {
    let temp = project();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .args(["dump", "base.yml", "board.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("machine: qemuarm64"))
        .stdout(predicate::str::contains("distro: poky"))
        .stdout(predicate::str::contains("version: 14"));
}

#[test]
fn test_dump_accepts_colon_separated_files() {
    let temp = project();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .args(["dump", "base.yml:board.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("machine: qemuarm64"));
}

#[test]
fn test_dump_json() {
    let temp = project();
    let mut cmd = cargo_bin_cmd!("layerpin");
    let output = cmd
        .current_dir(temp.path())
        .args(["dump", "--format", "json", "base.yml", "board.yml"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["header"]["version"], 14);
    assert_eq!(doc["machine"], "qemuarm64");
    assert!(doc["header"].get("includes").is_none());
}

#[test]
fn test_repos_view_json() {
    let temp = project();
    let mut cmd = cargo_bin_cmd!("layerpin");
    let output = cmd
        .current_dir(temp.path())
        .args(["repos", "base.yml"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let view: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let repo = &view["meta-custom"];
    let layers = repo["layers"].as_array().unwrap();
    assert_eq!(layers.len(), 1);
    assert!(layers[0].as_str().unwrap().ends_with("meta-foo"));
}

#[test]
fn test_lock_writes_lock_file() {
    let temp = project();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .args(["--color", "never", "lock", "base.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] Lock file written"))
        .stderr(predicate::str::contains("No versioned repositories"));

    temp.child("base.lock.yml")
        .assert(predicate::str::contains("overrides:"))
        .assert(predicate::str::contains("version: 14"));
}

#[test]
fn test_checkout_summary() {
    let temp = project();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .args(["--color", "never", "checkout", "base.yml", "board.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] meta-custom"))
        .stdout(predicate::str::contains("1 repositories ready"));
}

#[test]
fn test_work_dir_from_environment() {
    let temp = project();
    let mut cmd = cargo_bin_cmd!("layerpin");
    cmd.current_dir(temp.path())
        .env("LAYERPIN_WORK_DIR", temp.path().join("build"))
        .args(["checkout", "--quiet", "base.yml"])
        .assert()
        .success();

    temp.child("build/.layerpin.lock")
        .assert(predicate::path::exists());
}
