mod common;

use std::time::Duration;

use common::{DEFAULT_TIMEOUT, MayhemProcess};

// ============================================================================
// version command
// ============================================================================

#[test]
fn version_human() {
    let output = MayhemProcess::spawn_command(&["version"]);
    assert!(
        output.status.success(),
        "version should exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.starts_with("mayhem "),
        "version output should start with the binary name: {stdout}"
    );
    assert!(
        stdout.contains('.'),
        "version output should contain a version number: {stdout}"
    );
}

#[test]
fn version_json() {
    let output = MayhemProcess::spawn_command(&["version", "--format", "json"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("version JSON should be valid");
    assert_eq!(parsed["name"], "mayhem");
    assert!(parsed.get("version").is_some(), "missing version: {stdout}");
    assert_eq!(parsed["protocol_sentinel"], "##GOLFMAYHEM##");
}

// ============================================================================
// completions command
// ============================================================================

#[test]
fn completions_bash() {
    let output = MayhemProcess::spawn_command(&["completions", "bash"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mayhem"), "bash script should name the binary");
}

#[test]
fn completions_zsh() {
    let output = MayhemProcess::spawn_command(&["completions", "zsh"]);
    assert!(output.status.success());
    assert!(!output.stdout.is_empty());
}

#[test]
fn completions_unknown_shell_is_usage_error() {
    let output = MayhemProcess::spawn_command(&["completions", "tcsh"]);
    assert_eq!(output.status.code(), Some(2), "clap rejects unknown shells");
}

// ============================================================================
// effects command
// ============================================================================

#[test]
fn effects_lists_catalog() {
    let output = MayhemProcess::spawn_command(&["effects"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().next().unwrap().starts_with("ID"));
    for id in ["Gravity Flip", "Fog of War", "Tornado", "CoffeeRush"] {
        assert!(stdout.contains(id), "missing {id}: {stdout}");
    }
}

#[test]
fn effects_json_applies_config_overrides() {
    let config = MayhemProcess::fixture_path("valid.yaml");
    let output = MayhemProcess::spawn_command(&[
        "effects",
        "--format",
        "json",
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "effects should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let rows: Vec<serde_json::Value> =
        serde_json::from_slice(&output.stdout).expect("effects JSON should be valid");
    assert_eq!(rows.len(), 12);

    let tornado = rows.iter().find(|r| r["id"] == "Tornado").unwrap();
    assert_eq!(tornado["enabled"], false);

    let mines = rows.iter().find(|r| r["id"] == "Mine Flood").unwrap();
    assert_eq!(mines["weight"], 2.5);
    assert_eq!(mines["default_weight"], 0.8);
}

// ============================================================================
// validate command
// ============================================================================

#[test]
fn validate_valid_config() {
    let config = MayhemProcess::fixture_path("valid.yaml");
    let output = MayhemProcess::spawn_command(&["validate", config.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "validate should succeed for valid config: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains(": ok"));
}

#[test]
fn validate_invalid_config_exits_with_config_error() {
    let config = MayhemProcess::fixture_path("invalid.yaml");
    let output = MayhemProcess::spawn_command(&["validate", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("invalid"), "{stdout}");
    assert!(stdout.contains("chaos.interval_min"), "{stdout}");
    assert!(stdout.contains("chaos.tick_interval"), "{stdout}");
    assert!(stdout.contains("effects.Speed Surge.weight"), "{stdout}");
}

#[test]
fn validate_json_reports_every_file() {
    let valid = MayhemProcess::fixture_path("valid.yaml");
    let invalid = MayhemProcess::fixture_path("invalid.yaml");
    let output = MayhemProcess::spawn_command(&[
        "validate",
        "--format",
        "json",
        valid.to_str().unwrap(),
        invalid.to_str().unwrap(),
    ]);
    assert!(!output.status.success());

    let reports: Vec<serde_json::Value> =
        serde_json::from_slice(&output.stdout).expect("validate JSON should be valid");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["valid"], true);
    assert_eq!(reports[1]["valid"], false);
    assert_eq!(reports[1]["errors"].as_array().unwrap().len(), 3);
}

#[test]
fn validate_typo_warns_then_fails_strict() {
    let config = MayhemProcess::fixture_path("typo.yaml");
    let path = config.to_str().unwrap();

    let lenient = MayhemProcess::spawn_command(&["validate", path]);
    assert!(lenient.status.success());
    assert!(String::from_utf8_lossy(&lenient.stdout).contains("did you mean 'Tornado'"));

    let strict = MayhemProcess::spawn_command(&["validate", "--strict", path]);
    assert_eq!(strict.status.code(), Some(2));
}

#[test]
fn validate_unknown_field_is_parse_error() {
    let config = MayhemProcess::fixture_path("unknown_field.yaml");
    let output = MayhemProcess::spawn_command(&["validate", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stdout).contains("intervall_min"));
}

#[test]
fn validate_missing_file() {
    let output =
        MayhemProcess::spawn_command(&["validate", "/tmp/nonexistent_mayhem_test_file.yaml"]);
    assert!(!output.status.success());
}

// ============================================================================
// run command
// ============================================================================

#[tokio::test]
async fn run_follower_announces_frames_and_exits_on_eof() {
    let mut mayhem = MayhemProcess::spawn_run(&["--role", "follower"]);

    mayhem.send_line("hello from the clubhouse").await;
    mayhem
        .send_line("##GOLFMAYHEM##0|Fog of War|Fog rolls in!")
        .await;

    let line = mayhem
        .stderr_line_matching(|l| l.contains("Fog rolls in!"), DEFAULT_TIMEOUT)
        .await;
    assert_eq!(line, "GolfMayhem: Fog rolls in!");

    assert_eq!(mayhem.finish().await, Some(0));
}

#[tokio::test]
async fn run_host_broadcasts_full_cycle() {
    let config = MayhemProcess::fixture_path("fast_host.yaml");
    let mut mayhem = MayhemProcess::spawn_run(&["--config", config.to_str().unwrap()]);

    let timeout = Duration::from_secs(10);
    let warn = mayhem
        .stdout_line_matching(|l| l.starts_with("##GOLFMAYHEM##0|"), timeout)
        .await;
    let id = warn.split('|').nth(1).unwrap().to_owned();
    assert_ne!(id, "Fog of War", "zero-weight effects are never selected");

    let activate = mayhem
        .stdout_line_matching(|l| l.starts_with("##GOLFMAYHEM##"), timeout)
        .await;
    assert!(activate.starts_with(&format!("##GOLFMAYHEM##1|{id}|")), "{activate}");

    let deactivate = mayhem
        .stdout_line_matching(|l| l.starts_with("##GOLFMAYHEM##"), timeout)
        .await;
    assert_eq!(
        deactivate,
        format!("##GOLFMAYHEM##2|{id}|Chaos subsides... for now.")
    );
}
