//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They test the "wiring" between the CLI and the core library.

use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;

// ============================================================================
// Test Utilities
// ============================================================================

fn cli_cmd() -> Command {
    Command::cargo_bin("logroute").expect("Failed to find logroute binary")
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Kills the listener even when an assertion fails
struct ListenerGuard(Child);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_until_bound(port: u16) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(Instant::now() < deadline, "listener never bound port {}", port);
        thread::sleep(Duration::from_millis(50));
    }
}

// ============================================================================
// Help and Version
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("listen"))
        .stdout(predicate::str::contains("send"));
}

#[test]
fn test_version() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("logroute"));
}

#[test]
fn test_missing_subcommand_fails() {
    cli_cmd().assert().failure();
}

// ============================================================================
// Send Command Tests
// ============================================================================

#[test]
fn test_send_requires_message() {
    cli_cmd()
        .args(["send", "--port", "5000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MESSAGE"));
}

#[test]
fn test_send_rejects_out_of_range_port() {
    cli_cmd()
        .args(["send", "--port", "70000", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("70000"));
}

#[test]
fn test_send_rejects_unknown_level() {
    let port = free_port();
    cli_cmd()
        .args(["send", "--port", &port.to_string(), "--level", "loud", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("level \"loud\" not recognised"));
}

#[test]
fn test_send_without_listener_fails() {
    let port = free_port();
    cli_cmd()
        .args(["send", "--host", "127.0.0.1", "--port", &port.to_string(), "nobody home"])
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("was not delivered"));
}

// ============================================================================
// Listen Command Tests
// ============================================================================

#[test]
fn test_listen_rejects_unknown_layout() {
    let port = free_port();
    cli_cmd()
        .args(["listen", "--port", &port.to_string(), "--layout", "fancy"])
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("fancy"));
}

#[test]
fn test_listen_fails_when_port_taken() {
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();
    cli_cmd()
        .args(["listen", "--host", "127.0.0.1", "--port", &port.to_string()])
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot listen on"));
    drop(holder);
}

#[test]
fn test_send_reaches_listener() {
    let port = free_port();
    let child = std::process::Command::new(assert_cmd::cargo::cargo_bin("logroute"))
        .args([
            "listen",
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--layout",
            "messagePassThrough",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start listener");
    let mut guard = ListenerGuard(child);
    let stdout = guard.0.stdout.take().expect("piped stdout");

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    wait_until_bound(port);

    cli_cmd()
        .args([
            "send",
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--category",
            "jobs.nightly",
            "--level",
            "warn",
            "disk",
            "almost",
            "full",
        ])
        .timeout(Duration::from_secs(10))
        .assert()
        .success();

    let line = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("listener printed nothing");
    assert_eq!(line, "disk almost full");
}
