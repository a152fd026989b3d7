//! Mutual exclusion between separate processes through `evosearch with-lock`.

#![cfg(unix)]

use std::fs;
use std::process::Command;

use tempfile::tempdir;

const CRITICAL_SECTION: &str = "echo start >> \"$1\"; sleep 0.2; echo end >> \"$1\"";

#[test]
fn test_processes_do_not_overlap() {
    let dir = tempdir().unwrap();
    let lock_path = dir.path().join("gpu.lock");
    let log_path = dir.path().join("trace.log");

    let children: Vec<_> = (0..3)
        .map(|_| {
            Command::new(env!("CARGO_BIN_EXE_evosearch"))
                .arg("with-lock")
                .arg("--lock")
                .arg(&lock_path)
                .args(["--", "sh", "-c", CRITICAL_SECTION, "sh"])
                .arg(&log_path)
                .spawn()
                .unwrap()
        })
        .collect();
    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let trace = fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(lines.len(), 6);
    for pair in lines.chunks(2) {
        assert_eq!(pair, ["start", "end"]);
    }
}

#[test]
fn test_exit_status_is_forwarded() {
    let dir = tempdir().unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_evosearch"))
        .arg("with-lock")
        .arg("--lock")
        .arg(dir.path().join("gpu.lock"))
        .args(["--", "sh", "-c", "exit 3"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));
}
