//! Tests for the `bard` binary

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn bard(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bard"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Write a synthetic log and return its path
fn synth(dir: &TempDir, events: usize) -> std::path::PathBuf {
    let path = dir.path().join("trace.bard");
    let events = events.to_string();
    let output = bard(&["synth", path_arg(&path), "--events", &events, "--seed", "4"]);
    assert!(output.status.success(), "{:?}", output);
    path
}

fn summary(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_synth_then_inspect() {
    let dir = TempDir::new().unwrap();
    let path = synth(&dir, 300);
    assert!(path.exists());

    let output = bard(&["inspect", path_arg(&path)]);
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("version:      1.0"));
    assert!(stdout.contains("GetProcessHeap"));
    assert!(stdout.contains("HeapAlloc"));
}

#[test]
fn test_play_prints_reports_and_stats() {
    let dir = TempDir::new().unwrap();
    let path = synth(&dir, 400);

    let output = bard(&[
        "play",
        path_arg(&path),
        "--order",
        "shuffled",
        "--seed",
        "3",
        "--repeat",
        "2",
    ]);
    assert_eq!(output.status.code(), Some(0));

    let summary = summary(&output);
    let runs = summary["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    for run in runs {
        assert_eq!(run["state"], "Done");
        assert_eq!(run["failed"], 0);
    }
    assert!(summary["stats"]["kinds"]["HeapAlloc"]["count"].as_u64().unwrap() > 0);
}

#[test]
fn test_aborted_play_exits_with_status_2() {
    let dir = TempDir::new().unwrap();
    let path = synth(&dir, 200);

    let output = bard(&[
        "play",
        path_arg(&path),
        "--fail-every",
        "5",
        "--max-failures",
        "1",
    ]);
    assert_eq!(output.status.code(), Some(2));

    let summary = summary(&output);
    assert_eq!(summary["runs"][0]["state"]["Aborted"], "TooManyFailures");
    assert_eq!(summary["runs"][0]["failed"], 1);
}

#[test]
fn test_config_file_is_applied() {
    let dir = TempDir::new().unwrap();
    let path = synth(&dir, 200);
    let config = dir.path().join("story.json");
    std::fs::write(&config, r#"{"policy":{"max_failures":1}}"#).unwrap();

    let output = bard(&[
        "play",
        path_arg(&path),
        "--config",
        path_arg(&config),
        "--fail-every",
        "7",
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_log_fails() {
    let dir = TempDir::new().unwrap();
    let output = bard(&["play", path_arg(&dir.path().join("absent.bard"))]);
    assert!(!output.status.success());
    assert_ne!(output.status.code(), Some(2));
}

#[test]
fn test_log_dir_receives_log_files() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    let path = dir.path().join("trace.bard");

    let output = bard(&[
        "--log-dir",
        path_arg(&logs),
        "synth",
        path_arg(&path),
        "--events",
        "50",
    ]);
    assert!(output.status.success());

    let files: Vec<_> = std::fs::read_dir(&logs)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(files.iter().any(|name| name.starts_with("bard")), "{:?}", files);
}
