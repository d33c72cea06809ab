//! Command-line behaviour of the client binary.

use std::process::{Command, Output};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_led-client"))
        .args(args)
        // Nothing listens here; a usage error must fail before connecting.
        .args(["--address", "unix:path=/nonexistent/ledbus.sock"])
        .output()
        .unwrap()
}

#[test]
fn test_unknown_command_is_usage_error() {
    let output = run(&["foo"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "{stderr}");
}

#[test]
fn test_missing_argument_is_usage_error() {
    let output = run(&["flash", "1.0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_help_exits_zero() {
    let output = run(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("flash"), "{stdout}");
}

#[test]
fn test_unreachable_router_reports_bus_status() {
    let output = run(&["status"]);
    let code = output.status.code().unwrap();
    assert!(code > 1, "exit status {code}");
    assert!(output.stdout.is_empty());
}
