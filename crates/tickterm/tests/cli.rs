#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tickterm(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tickterm").unwrap();
    cmd.env_remove("TICKTERM_CONTAINER")
        .env_remove("TICKTERM_RUNTIME")
        .env("TICKTERM_DATA_DIR", data_dir.path());
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    tickterm(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tick"))
        .stdout(predicate::str::contains("registry"))
        .stdout(predicate::str::contains("system/notifications/"));
}

#[test]
fn test_config_prints_resolved_paths() {
    let dir = TempDir::new().unwrap();
    let output = tickterm(&dir)
        .args(["config", "--container", "devbox"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["container"], "devbox");
    assert_eq!(config["runtime"], "podman");
    assert_eq!(config["idle_timeout_secs"], 300);
    assert!(config["paths"]["sessions"]
        .as_str()
        .unwrap()
        .ends_with("tmp/sessions"));
}

#[test]
fn test_registry_empty_without_a_tick() {
    let dir = TempDir::new().unwrap();
    tickterm(&dir)
        .arg("registry")
        .assert()
        .success()
        .stdout(predicate::str::diff("{}\n"));
}

#[test]
fn test_paused_tick_refuses_to_start() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("system")).unwrap();
    std::fs::write(dir.path().join("system/paused"), "Paused at now due to test.\n").unwrap();

    tickterm(&dir)
        .arg("tick")
        .env("TICKTERM_LOG_DIR", dir.path().join("logs"))
        .write_stdin("")
        .assert()
        .code(75)
        .stderr(predicate::str::contains("Ticking is paused"))
        .stderr(predicate::str::contains("delete it to resume"));
    assert!(!dir.path().join("system/state.json").exists());
}

#[test]
fn test_unknown_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    tickterm(&dir)
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
