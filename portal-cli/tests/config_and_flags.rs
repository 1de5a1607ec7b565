use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn portal_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("portal"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

fn write_config(home: &Path, yaml: &str) {
    let dir = home.join(".portal");
    fs::create_dir_all(&dir).expect("portal dir");
    fs::write(dir.join("config.yaml"), yaml).expect("write config");
}

const FLAGS_CONFIG: &str = r#"
version: 1
flags:
  - name: beta-ui
    plugin_id: catalog
    description: New catalog page
  - name: local-preview
    plugin_id: catalog
    persisted: false
"#;

#[test]
fn init_creates_config_and_is_idempotent() {
    let home = TempDir::new().expect("home");

    portal_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Initialized portal config"));
    assert!(home.path().join(".portal/config.yaml").exists());

    portal_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Already initialized"));
}

#[test]
fn commands_without_config_point_at_init() {
    let home = TempDir::new().expect("home");
    portal_cmd(home.path())
        .args(["provider", "list"])
        .assert()
        .failure()
        .stderr(contains("portal init"));
}

#[test]
fn provider_list_shows_configured_providers() {
    let home = TempDir::new().expect("home");
    write_config(
        home.path(),
        r#"
version: 1
providers:
  - id: inventory
    source:
      url: http://127.0.0.1:9/items
    schedule:
      frequency_secs: 300
  - id: legacy
    template: nope
    source:
      url: http://127.0.0.1:9/legacy
"#,
    );

    portal_cmd(home.path())
        .args(["provider", "list"])
        .assert()
        .success()
        .stdout(contains("inventory"))
        .stdout(contains("provider:inventory"))
        .stdout(contains("300s"))
        .stdout(contains("nope (missing)"));
}

#[test]
fn flag_set_persists_across_invocations() {
    let home = TempDir::new().expect("home");
    write_config(home.path(), FLAGS_CONFIG);

    portal_cmd(home.path())
        .args(["flags", "get", "beta-ui"])
        .assert()
        .success()
        .stdout(contains("false"));

    portal_cmd(home.path())
        .args(["flags", "set", "beta-ui", "true"])
        .assert()
        .success()
        .stdout(contains("beta-ui = true"));

    portal_cmd(home.path())
        .args(["flags", "get", "beta-ui"])
        .assert()
        .success()
        .stdout(contains("true"));

    let stored = fs::read_to_string(home.path().join(".portal/storage/featureFlags.json"))
        .expect("flag storage file");
    assert!(stored.contains("beta-ui"), "{stored}");
}

#[test]
fn session_flag_is_not_written_to_disk() {
    let home = TempDir::new().expect("home");
    write_config(home.path(), FLAGS_CONFIG);

    portal_cmd(home.path())
        .args(["flags", "set", "local-preview", "true"])
        .assert()
        .success()
        .stdout(contains("session flag"));

    portal_cmd(home.path())
        .args(["flags", "get", "local-preview"])
        .assert()
        .success()
        .stdout(contains("false"));
}

#[test]
fn flags_list_shows_declarations() {
    let home = TempDir::new().expect("home");
    write_config(home.path(), FLAGS_CONFIG);

    portal_cmd(home.path())
        .args(["flags", "list"])
        .assert()
        .success()
        .stdout(contains("beta-ui"))
        .stdout(contains("New catalog page"))
        .stdout(contains("session"));
}

#[test]
fn undeclared_flag_warns_unless_strict() {
    let home = TempDir::new().expect("home");
    write_config(home.path(), FLAGS_CONFIG);

    portal_cmd(home.path())
        .args(["flags", "set", "ghost", "true"])
        .assert()
        .success()
        .stderr(contains("not declared"));

    write_config(home.path(), &format!("strict_mode: true\n{FLAGS_CONFIG}"));
    portal_cmd(home.path())
        .args(["flags", "set", "ghost", "false"])
        .assert()
        .failure()
        .stderr(contains("strict mode"));
}

#[test]
fn status_json_reports_never_synced() {
    let home = TempDir::new().expect("home");
    write_config(
        home.path(),
        r#"
version: 1
providers:
  - id: inventory
    source:
      url: http://127.0.0.1:9/items
"#,
    );

    let output = portal_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("run portal status");
    assert!(output.status.success());

    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(payload["summary"]["providers"], 1);
    assert_eq!(payload["summary"]["needs_sync"], 1);
    assert_eq!(payload["providers"][0]["provider"], "inventory");
    assert_eq!(payload["providers"][0]["status"], "never_synced");
    assert_eq!(payload["providers"][0]["last_success_age"], "never");
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");
    portal_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));

    portal_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}
