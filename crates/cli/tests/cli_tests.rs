//! CLI integration tests

use std::process::Command;

fn shotml(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "shotml-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = shotml(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("golf shot model"), "Should show app description");
    assert!(stdout.contains("predict"), "Should show predict command");
    assert!(stdout.contains("outcome"), "Should show outcome command");
    assert!(stdout.contains("health"), "Should show health command");
    assert!(stdout.contains("versions"), "Should show versions command");
    assert!(stdout.contains("train"), "Should show train command");
    assert!(stdout.contains("config"), "Should show config command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = shotml(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("shotml"), "Should show binary name");
}

#[test]
fn test_predict_help() {
    let output = shotml(&["predict", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "predict help should succeed");
    assert!(stdout.contains("--feature"), "Should show --feature option");
    assert!(stdout.contains("--point"), "Should show --point option");
    assert!(stdout.contains("--confidence"), "Should show --confidence option");
}

#[test]
fn test_outcome_requires_actual_value() {
    let output = shotml(&["outcome", "Driver", "some-prediction-id"]);

    assert!(!output.status.success(), "outcome without a value should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ACTUAL"), "Should name the missing argument");
}

#[test]
fn test_malformed_feature_rejected() {
    let output = shotml(&["predict", "Driver", "--feature", "club_speed"]);

    assert!(!output.status.success(), "malformed feature should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("name=value"), "Should explain the expected format");
}

#[test]
fn test_invalid_format_rejected() {
    let output = shotml(&["--format", "yaml", "health", "Driver"]);

    assert!(!output.status.success(), "unknown format should fail");
}
