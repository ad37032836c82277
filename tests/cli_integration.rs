//! Integration tests for the slotwatch CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use chrono::{Duration, Utc};
use predicates::prelude::*;
use serde_json::json;
use slotwatch::session::{SessionState, SessionStatus};
use slotwatch::state::PersistedState;
use slotwatch::store::FileStateStore;
use tempfile::TempDir;

const SLOT_BODY: &str = concat!(
    "<p>Number of available tests between 23 <span>March</span> 2026 &ndash; 29 March 2026</p>",
    r#"<a href="/obs?execution=e1s2&amp;_eventId=searchForDaySlots&amp;date=2026-03-24">Tue</a>"#,
);

/// Get a Command for the slotwatch binary, pointed at `dir`
fn slotwatch(dir: &TempDir) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("slotwatch"));
    cmd.arg("--state-dir").arg(dir.path()).env("NO_COLOR", "1");
    cmd
}

fn write_settings(dir: &TempDir, value: &serde_json::Value) {
    std::fs::write(
        dir.path().join("settings.json"),
        serde_json::to_string_pretty(value).unwrap(),
    )
    .unwrap();
}

fn write_state(dir: &TempDir, session: SessionState) {
    let store = FileStateStore::new(dir.path());
    let mut state = PersistedState::new();
    state.session = session;
    state.counters.session_total = 7;
    state.save(&store).unwrap();
}

#[test]
fn test_help() {
    let temp = TempDir::new().unwrap();
    slotwatch(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Watch a booking page"));
}

#[test]
fn test_version() {
    let temp = TempDir::new().unwrap();
    slotwatch(&temp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_status_without_state() {
    let temp = TempDir::new().unwrap();
    slotwatch(&temp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No session recorded"));
}

#[test]
fn test_status_shows_running_session() {
    let temp = TempDir::new().unwrap();
    write_state(
        &temp,
        SessionState {
            status: SessionStatus::Running,
            countdown_remaining_secs: 754,
            ..SessionState::default()
        },
    );

    slotwatch(&temp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("running"))
        .stdout(predicate::str::contains("Time left: 12:34"))
        .stdout(predicate::str::contains("7 this session"));
}

#[test]
fn test_status_shows_cooldown() {
    let temp = TempDir::new().unwrap();
    write_state(
        &temp,
        SessionState {
            last_full_duration_stop_at: Some(Utc::now() - Duration::minutes(10)),
            ..SessionState::default()
        },
    );

    slotwatch(&temp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("35 minute(s) left"));
}

#[test]
fn test_status_json() {
    let temp = TempDir::new().unwrap();
    write_state(&temp, SessionState::default());

    let output = slotwatch(&temp)
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["session"]["status"], "idle");
    assert_eq!(value["counters"]["session_total"], 7);
}

#[test]
fn test_stop_writes_request_file() {
    let temp = TempDir::new().unwrap();
    slotwatch(&temp)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stop requested"));

    assert!(temp.path().join("stop.request").exists());
}

#[test]
fn test_reset_clears_state() {
    let temp = TempDir::new().unwrap();
    write_state(&temp, SessionState::default());

    slotwatch(&temp)
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("Session state cleared"));
    assert!(!temp.path().join("state.json").exists());

    slotwatch(&temp)
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("No session state"));
}

#[test]
fn test_classify_slot_and_deadline() {
    let temp = TempDir::new().unwrap();
    let body = temp.path().join("weekly.html");
    std::fs::write(&body, SLOT_BODY).unwrap();

    slotwatch(&temp)
        .arg("classify")
        .arg(&body)
        .args(["--deadline", "2026-04-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("slot_found"))
        .stdout(predicate::str::contains(
            "/obs?execution=e1s2&_eventId=searchForDaySlots&date=2026-03-24",
        ));

    slotwatch(&temp)
        .arg("classify")
        .arg(&body)
        .args(["--deadline", "2026-03-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no_slot"));
}

#[test]
fn test_classify_rate_limit() {
    let temp = TempDir::new().unwrap();
    let body = temp.path().join("blocked.html");
    std::fs::write(&body, "<title>Pardon Our Interruption</title>").unwrap();

    slotwatch(&temp)
        .arg("classify")
        .arg(&body)
        .assert()
        .success()
        .stdout(predicate::str::contains("rate_limited"));
}

#[test]
fn test_classify_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    slotwatch(&temp)
        .args(["classify", "does-not-exist.html"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_config_validate_reports_missing_credentials() {
    let temp = TempDir::new().unwrap();
    slotwatch(&temp)
        .args(["config", "validate"])
        .assert()
        .code(7)
        .stdout(predicate::str::contains("settings.json not found"))
        .stderr(predicate::str::contains("account is missing"));
}

#[test]
fn test_config_validate_ok() {
    let temp = TempDir::new().unwrap();
    write_settings(
        &temp,
        &json!({ "account": { "username": "driver", "password": "secret" } }),
    );

    slotwatch(&temp)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("settings.json is valid"));
}

#[test]
fn test_config_validate_rejects_bad_json() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("settings.json"), "{ not json").unwrap();

    slotwatch(&temp)
        .args(["config", "validate"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("cannot parse settings"));
}

#[test]
fn test_config_show_masks_password() {
    let temp = TempDir::new().unwrap();
    write_settings(
        &temp,
        &json!({
            "session": { "maxClicks": 42 },
            "account": { "username": "driver", "password": "hunter2" }
        }),
    );

    slotwatch(&temp)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"maxClicks\": 42"))
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_state_dir_from_env() {
    let temp = TempDir::new().unwrap();
    Command::new(cargo::cargo_bin!("slotwatch"))
        .env("SLOTWATCH_STATE_DIR", temp.path())
        .arg("stop")
        .assert()
        .success();

    assert!(temp.path().join("stop.request").exists());
}

#[test]
fn test_run_rejects_invalid_session_settings() {
    let temp = TempDir::new().unwrap();
    write_settings(
        &temp,
        &json!({ "session": { "jitterMin": 3.0, "jitterMax": 1.0 } }),
    );

    slotwatch(&temp).arg("run").assert().code(7);
}

#[test]
fn test_run_without_browser_fails() {
    let temp = TempDir::new().unwrap();
    write_settings(
        &temp,
        &json!({
            "account": { "username": "driver", "password": "secret" },
            "browser": { "debugHost": "127.0.0.1", "debugPort": 1 }
        }),
    );

    slotwatch(&temp).arg("run").assert().code(5);
}
