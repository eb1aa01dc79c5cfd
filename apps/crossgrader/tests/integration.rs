//! Integration tests for the crossgrader CLI

use std::process::Command;

fn crossgrader() -> Command {
    Command::new(env!("CARGO_BIN_EXE_crossgrader"))
}

#[test]
fn test_cli_version() {
    let output = crossgrader()
        .arg("--version")
        .output()
        .expect("Failed to execute crossgrader");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("crossgrader"));
}

#[test]
fn test_cli_help() {
    let output = crossgrader()
        .arg("--help")
        .output()
        .expect("Failed to execute crossgrader");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("TARGET_ARCH"));
    assert!(stdout.contains("--second-stage"));
    assert!(stdout.contains("--third-stage"));
    assert!(stdout.contains("--install-from"));
}

#[test]
fn test_missing_target_is_usage_error() {
    let output = crossgrader()
        .output()
        .expect("Failed to execute crossgrader");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_conflicting_stages_are_usage_error() {
    let output = crossgrader()
        .args(["amd64", "--second-stage", "--third-stage", "arm64"])
        .output()
        .expect("Failed to execute crossgrader");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be used with"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = crossgrader()
        .args(["--cleanup", "--config"])
        .arg(dir.path().join("absent.toml"))
        .output()
        .expect("Failed to execute crossgrader");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Configuration error"));
}
