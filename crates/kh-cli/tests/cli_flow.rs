//! End-to-end tests for the `kh` binary.
//!
//! Tests the full pipeline: track (stdin) → combos / neighbors / stats → merge.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn kh_binary() -> String {
    env!("CARGO_BIN_EXE_kh").to_string()
}

/// A command isolated from the user's config and environment.
fn kh(home: &Path) -> Command {
    let mut command = Command::new(kh_binary());
    command
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_DATA_HOME", home.join(".local/share"))
        .env_remove("KH_DATABASE_PATH")
        .env_remove("KH_MIN_COMBO_LEN")
        .env_remove("KH_STALE_AFTER_SECS")
        .env_remove("RUST_LOG");
    command
}

/// Console lines for a press/release sequence, toggling each key like the firmware.
fn console_lines(positions: &[i64]) -> String {
    let mut held = std::collections::HashSet::new();
    let mut out = String::from("<inf> usb: device connected\n");
    for &position in positions {
        let pressed = held.insert(position);
        if !pressed {
            held.remove(&position);
        }
        out.push_str(&format!(
            "[00:00:01.000,000] <dbg> zmk: position_state_changed_listener: \
             Row: 0, col: {position}, position: {position}, pressed: {pressed}\n"
        ));
    }
    out
}

fn track_stdin(home: &Path, db: &Path, input: &str) -> Output {
    let mut child = kh(home)
        .arg("track")
        .arg("--db")
        .arg(db)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn kh track");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn run_ok(command: &mut Command) -> String {
    let output = command.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_track_then_query() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("keys.sqlite");

    let output = track_stdin(
        temp.path(),
        &db,
        &console_lines(&[1, 2, 1, 2, 3, 1, 4, 3, 4, 1]),
    );
    assert!(
        output.status.success(),
        "track failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary = String::from_utf8(output.stdout).unwrap();
    assert!(summary.starts_with("Recorded 10 key events (0 rejected, 0 not stored)\n"));
    assert!(summary.contains("Distinct combos: 4\n"));
    assert!(summary.contains("Top combos:\n  1 + 2: 1\n"));

    let combos = run_ok(kh(temp.path()).args(["combos", "-p", "1", "--db"]).arg(&db));
    assert_eq!(
        combos,
        "Combos with key 1:\n  1 + 2: 1\n  1 + 3: 1\n  1 + 4: 1\n  1 + 3 + 4: 1\n"
    );

    let neighbors = run_ok(kh(temp.path()).args(["neighbors", "-p", "1", "--db"]).arg(&db));
    assert_eq!(
        neighbors,
        "Keys pressed after key 1:\n  1 -> 2: 1\n  1 -> 4: 1\n"
    );

    let stats = run_ok(kh(temp.path()).args(["stats", "--json", "--db"]).arg(&db));
    let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
    let counts: Vec<(i64, i64)> = stats
        .as_array()
        .unwrap()
        .iter()
        .map(|c| (c["position"].as_i64().unwrap(), c["count"].as_i64().unwrap()))
        .collect();
    assert_eq!(counts, vec![(1, 2), (2, 1), (3, 1), (4, 1)]);
}

#[test]
fn test_history_survives_restart() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("keys.sqlite");

    assert!(track_stdin(temp.path(), &db, &console_lines(&[5, 6, 6, 5])).status.success());
    assert!(track_stdin(temp.path(), &db, &console_lines(&[5, 6, 6, 5])).status.success());

    let combos = run_ok(kh(temp.path()).args(["combos", "-p", "6", "--json", "--db"]).arg(&db));
    let combos: serde_json::Value = serde_json::from_str(&combos).unwrap();
    assert_eq!(combos[0]["keys"], serde_json::json!([5, 6]));
    assert_eq!(combos[0]["pressed"], 2);
}

#[test]
fn test_track_rejects_single_file() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("left.log");
    std::fs::write(&input, console_lines(&[1])).unwrap();

    let output = kh(temp.path())
        .args(["track", "--db"])
        .arg(temp.path().join("keys.sqlite"))
        .arg("-f")
        .arg(&input)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("exactly 0 or 2 input files"));
}

#[test]
fn test_merge_refuses_existing_output() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.sqlite");
    let b = temp.path().join("b.sqlite");
    let out = temp.path().join("merged.sqlite");
    assert!(track_stdin(temp.path(), &a, &console_lines(&[1, 1])).status.success());
    assert!(track_stdin(temp.path(), &b, &console_lines(&[2, 2, 3, 3])).status.success());

    let merged = run_ok(
        kh(temp.path())
            .arg("merge")
            .arg("-f")
            .arg(&a)
            .arg("-f")
            .arg(&b)
            .arg("-o")
            .arg(&out),
    );
    assert!(merged.starts_with("Merged 6 key events from 2 files"));

    let again = kh(temp.path())
        .arg("merge")
        .arg("-f")
        .arg(&a)
        .arg("-o")
        .arg(&out)
        .output()
        .unwrap();
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));
}

#[test]
fn test_unknown_key_reports_no_data() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("keys.sqlite");

    let output = run_ok(kh(temp.path()).args(["neighbors", "-p", "42", "--db"]).arg(&db));
    assert_eq!(output, "No data recorded for key 42.\n");
}

#[test]
fn test_invalid_env_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("keys.sqlite");

    let output = kh(temp.path())
        .env("KH_STALE_AFTER_SECS", "-1")
        .args(["combos", "-p", "1", "--db"])
        .arg(&db)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"));
    assert!(stderr.contains("stale_after_secs must be positive"));
}
