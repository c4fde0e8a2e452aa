//! CLI argument parsing and command output tests.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A command isolated from any `dynamo.toml` in the caller's directory.
fn dynamo(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dynamo").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

// ============================================================================
// Help and Listing
// ============================================================================

#[test]
fn version_flag_shows_version() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dynamo"));
}

#[test]
fn help_flag_shows_usage() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dynamo replication simulator"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn list_names_every_scenario() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("simple-put"))
        .stdout(predicate::str::contains("handoff-recovery"))
        .stdout(predicate::str::contains("partition-restore"));
}

// ============================================================================
// Running Scenarios
// ============================================================================

#[test]
fn run_unknown_scenario_fails() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .args(["run", "no-such-scenario"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown scenario"));
}

#[test]
fn run_requires_a_scenario() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir).arg("run").assert().failure();
}

#[test]
fn run_full_history_shows_the_client_reply() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .args(["run", "simple-put", "--seed", "3", "--full"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ClientPutRsp"))
        .stdout(predicate::str::contains("Contents"));
}

#[test]
fn run_is_repeatable_for_a_seed() {
    let dir = TempDir::new().unwrap();
    let first = dynamo(&dir)
        .args(["run", "fail-initial-node", "--seed", "42", "--full"])
        .output()
        .unwrap();
    let second = dynamo(&dir)
        .args(["run", "fail-initial-node", "--seed", "42", "--full"])
        .output()
        .unwrap();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn run_json_emits_one_object_per_line() {
    let dir = TempDir::new().unwrap();
    let output = dynamo(&dir)
        .args(["run", "simple-get", "--seed", "1", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.lines().count() > 0);
    for line in text.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
}

#[test]
fn run_save_writes_history_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.bin");
    dynamo(&dir)
        .args(["run", "double-put", "--save", path.to_str().unwrap()])
        .assert()
        .success();
    assert!(path.exists());
}

#[test]
fn run_with_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .args(["run", "simple-put", "--config", "missing.toml"])
        .assert()
        .failure();
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn config_init_then_run_with_it() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dynamo.toml"));
    assert!(dir.path().join("dynamo.toml").exists());

    dynamo(&dir)
        .args(["run", "simple-put", "--config", "dynamo.toml"])
        .assert()
        .success();
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir).args(["config", "init"]).assert().success();
    dynamo(&dir)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    dynamo(&dir)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn config_show_formats() {
    let dir = TempDir::new().unwrap();
    dynamo(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[replication]"));
    dynamo(&dir)
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"replication\""));
    dynamo(&dir)
        .args(["config", "show", "--format", "yaml"])
        .assert()
        .failure();
}
