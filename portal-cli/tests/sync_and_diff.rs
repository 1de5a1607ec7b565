use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::thread::{self, JoinHandle};

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

/// Answer one GET per body, in order, then stop.
fn serve(bodies: Vec<&'static str>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let handle = thread::spawn(move || {
        for body in bodies {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read");
                if line.trim_end().is_empty() {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write");
            stream.flush().expect("flush");
        }
    });
    (base, handle)
}

fn write_provider_config(home: &Path, base: &str) {
    let dir = home.join(".portal");
    fs::create_dir_all(&dir).expect("portal dir");
    fs::write(
        dir.join("config.yaml"),
        format!(
            r#"
version: 1
providers:
  - id: inventory
    source:
      url: {base}/items
      items_pointer: /value
      required_fields: [name]
"#
        ),
    )
    .expect("write config");
}

const TWO_ITEMS: &str =
    r#"{"value":[{"id":"repo-1","name":"web","owner":"team-a"},{"id":"repo-2","name":"api","owner":"team-b"}]}"#;
const ONE_ITEM_CHANGED: &str =
    r#"{"value":[{"id":"repo-1","name":"web","owner":"team-c"}]}"#;
const NO_ITEMS: &str = r#"{"value":[]}"#;

#[test]
fn sync_writes_catalog_and_history() {
    let home = TempDir::new().expect("home");
    let (base, server) = serve(vec![TWO_ITEMS]);
    write_provider_config(home.path(), &base);

    portal_cmd(home.path())
        .args(["sync", "inventory"])
        .assert()
        .success()
        .stdout(contains("'inventory' synced (2 added, 0 updated, 0 removed, 0 unchanged)"));
    server.join().expect("server");

    let catalog = fs::read_to_string(home.path().join(".portal/catalog.json")).expect("catalog");
    assert!(catalog.contains("inventory:repo-1"), "{catalog}");
    assert!(catalog.contains("inventory:repo-2"), "{catalog}");

    let history = fs::read_to_string(home.path().join(".portal/state/inventory.json"))
        .expect("history");
    let history: serde_json::Value = serde_json::from_str(&history).expect("history json");
    assert_eq!(history["entity_count"], 2);
    assert!(history["last_error"].is_null());

    let output = portal_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("status");
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(payload["providers"][0]["status"], "current");
    assert_eq!(payload["providers"][0]["entity_count"], 2);
}

#[test]
fn dry_run_reports_changes_and_writes_nothing() {
    let home = TempDir::new().expect("home");
    let (base, server) = serve(vec![TWO_ITEMS]);
    write_provider_config(home.path(), &base);

    portal_cmd(home.path())
        .args(["sync", "--all", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("[dry-run]"))
        .stdout(contains("+  inventory:repo-1"))
        .stdout(contains("+  inventory:repo-2"));
    server.join().expect("server");

    assert!(!home.path().join(".portal/catalog.json").exists());
    assert!(!home.path().join(".portal/state/inventory.json").exists());
}

#[test]
fn diff_shows_body_changes_after_sync() {
    let home = TempDir::new().expect("home");
    let (base, server) = serve(vec![TWO_ITEMS, ONE_ITEM_CHANGED, TWO_ITEMS]);
    write_provider_config(home.path(), &base);

    portal_cmd(home.path())
        .args(["sync", "inventory"])
        .assert()
        .success();

    portal_cmd(home.path())
        .args(["diff", "inventory"])
        .assert()
        .success()
        .stdout(contains("--- a/inventory:repo-1"))
        .stdout(contains("+++ b/inventory:repo-1"))
        .stdout(contains("team-c"))
        .stdout(contains("--- a/inventory:repo-2"));

    portal_cmd(home.path())
        .args(["diff", "inventory"])
        .assert()
        .success()
        .stdout(contains("No differences for 'inventory'."));
    server.join().expect("server");
}

#[test]
fn empty_remote_leaves_catalog_untouched() {
    let home = TempDir::new().expect("home");
    let (base, server) = serve(vec![TWO_ITEMS, NO_ITEMS]);
    write_provider_config(home.path(), &base);

    portal_cmd(home.path())
        .args(["sync", "inventory"])
        .assert()
        .success();
    let before = fs::read_to_string(home.path().join(".portal/catalog.json")).expect("catalog");

    portal_cmd(home.path())
        .args(["sync", "inventory"])
        .assert()
        .success()
        .stdout(contains("catalog left unchanged"));
    server.join().expect("server");

    let after = fs::read_to_string(home.path().join(".portal/catalog.json")).expect("catalog");
    assert_eq!(before, after);
}

#[test]
fn unreachable_remote_fails_and_records_error() {
    let home = TempDir::new().expect("home");
    // Bind then drop so the port refuses connections.
    let base = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        format!("http://{}", listener.local_addr().expect("addr"))
    };
    write_provider_config(home.path(), &base);

    portal_cmd(home.path())
        .args(["sync", "inventory"])
        .assert()
        .failure()
        .stdout(contains("'inventory' failed"))
        .stderr(contains("1 provider(s) failed"));

    let output = portal_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("status");
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(payload["providers"][0]["status"], "failing");
    assert_eq!(payload["summary"]["failing"], 1);
}

#[test]
fn sync_requires_provider_or_all() {
    let home = TempDir::new().expect("home");
    portal_cmd(home.path()).arg("init").assert().success();

    portal_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("--all"));
}
