//! CLI integration tests for tbx2depfile.

mod common;

use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

use common::distribution;

fn tbx2depfile() -> Command {
    let mut cmd = Command::cargo_bin("tbx2depfile").unwrap();
    cmd.env_remove("TBXTOOLS_CONFIG");
    cmd
}

// ============================================================================
// tbx2depfile read
// ============================================================================

#[test]
fn test_read_writes_yaml_summary() {
    let dist = distribution();
    let out = TempDir::new().unwrap();
    let summary = out.path().join("scons_targets.yml");

    tbx2depfile()
        .arg("read")
        .arg(dist.path())
        .arg("-o")
        .arg(&summary)
        .assert()
        .success();

    let text = fs::read_to_string(&summary).unwrap();
    assert!(text.contains("name: scitbx_ext"));
    assert!(text.contains("type: module"));
    assert!(text.contains("type: program"));
    assert!(text.contains("origin: cctbx_project/scitbx/tools"));
    assert!(!text.contains("clipper"));
}

#[test]
fn test_read_logs_progress() {
    let dist = distribution();
    let out = TempDir::new().unwrap();

    tbx2depfile()
        .arg("read")
        .arg(dist.path())
        .arg("-o")
        .arg(out.path().join("summary.yml"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Reading TBX distribution"));
}

#[test]
fn test_read_writes_json_summary() {
    let dist = distribution();
    let out = TempDir::new().unwrap();

    tbx2depfile()
        .arg("read")
        .arg(dist.path())
        .arg("--json")
        .current_dir(out.path())
        .assert()
        .success();

    let text = fs::read_to_string(out.path().join("scons_targets.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let targets = value["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 3);
    assert!(targets.iter().any(|t| t["name"] == "scitbx_core" && t["type"] == "shared"));
}

#[test]
fn test_read_with_build_info_file() {
    let dist = distribution();
    let out = TempDir::new().unwrap();
    let info = out.path().join("build_info.yaml");
    fs::write(&info, "dependencies:\n  scitbx.show: [hdf5]\n").unwrap();
    let summary = out.path().join("summary.yml");

    tbx2depfile()
        .arg("read")
        .arg(dist.path())
        .arg("--build-info")
        .arg(&info)
        .arg("-o")
        .arg(&summary)
        .assert()
        .success();

    assert!(fs::read_to_string(&summary).unwrap().contains("- hdf5"));
}

#[test]
fn test_read_rejects_unknown_build_info_target() {
    let dist = distribution();
    let out = TempDir::new().unwrap();
    let info = out.path().join("build_info.yaml");
    fs::write(&info, "dependencies:\n  not_a_target: [hdf5]\n").unwrap();

    tbx2depfile()
        .arg("read")
        .arg(dist.path())
        .arg("--build-info")
        .arg(&info)
        .arg("-o")
        .arg(out.path().join("summary.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not apply build info"));
}

#[test]
fn test_read_requires_directory() {
    let out = TempDir::new().unwrap();
    let file = out.path().join("not_a_dir");
    fs::write(&file, "").unwrap();

    tbx2depfile()
        .arg("read")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be a directory"));
}

// ============================================================================
// tbx2depfile order
// ============================================================================

#[test]
fn test_order_starts_with_root_module() {
    let dist = distribution();

    let output = tbx2depfile().arg("order").arg(dist.path()).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let order: Vec<&str> = stdout.lines().collect();
    assert_eq!(order.first(), Some(&"libtbx"));
    assert!(order.contains(&"scitbx"));
}

// ============================================================================
// tbx2depfile deps
// ============================================================================

#[test]
fn test_deps_lists_requirements() {
    let dist = distribution();

    tbx2depfile()
        .arg("deps")
        .arg(dist.path())
        .arg("scitbx")
        .assert()
        .success()
        .stdout(predicate::str::contains("* scitbx"))
        .stdout(predicate::str::contains("boost_adaptbx"));
}

#[test]
fn test_deps_missing_module_fails() {
    let dist = distribution();

    tbx2depfile()
        .arg("deps")
        .arg(dist.path())
        .arg("no_such_module")
        .assert()
        .failure();
}

#[test]
fn test_help() {
    tbx2depfile()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("read"))
        .stdout(predicate::str::contains("order"));
}
