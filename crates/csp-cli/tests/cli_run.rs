// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Integration tests for the `csp` binary.
//! Each test runs one demo with short sleeps and checks stdout.

use std::process::{Command, Output};

/// `csp` with every `CSP_*` setting of the calling environment removed.
fn csp_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_csp"));
    cmd.env("NO_COLOR", "1");
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("CSP_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

fn csp(args: &[&str]) -> Output {
    let out = csp_command()
        .args(args)
        .output()
        .expect("failed to run csp");
    assert!(
        out.status.success(),
        "csp {:?} failed:\nstdout: {}\nstderr: {}",
        args,
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr),
    );
    out
}

fn stdout_lines(out: &Output) -> Vec<String> {
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn basic_prints_values_in_order() {
    let out = csp(&["basic", "--interval-ms", "10"]);
    assert_eq!(
        stdout_lines(&out),
        vec![
            "First value is 1",
            "Second value is 2",
            "Third value is 3"
        ]
    );
}

#[test]
fn basic_time_sliced_and_polling() {
    let out = csp(&[
        "basic",
        "--interval-ms",
        "10",
        "--time-slice-ms",
        "5",
        "--policy",
        "poll",
    ]);
    assert_eq!(stdout_lines(&out).len(), 3);
}

#[test]
fn alts_prints_both_channels() {
    let out = csp(&["alts"]);
    assert_eq!(
        stdout_lines(&out),
        vec!["alts: Value on chan 1", "alts: Value on chan 2"]
    );
}

#[test]
fn ping_pong_alternates() {
    let out = csp(&["ping-pong", "--cycles", "3", "--interval-ms", "5"]);
    let lines = stdout_lines(&out);
    let sent_ping = lines.iter().filter(|l| l.ends_with("Sent ping")).count();
    let got_pong = lines.iter().filter(|l| l.ends_with("Received pong")).count();
    assert_eq!(sent_ping, 3);
    assert_eq!(got_pong, 3);
    assert!(lines[0].contains("PING     Sent ping"), "{lines:?}");
    assert!(lines[0].starts_with('['));
}

#[test]
fn mixed_reports_every_thousandth_iteration() {
    let out = csp(&["mixed", "--iterations", "3500", "--time-slice-ms", "1", "--stats"]);
    let lines = stdout_lines(&out);
    assert_eq!(lines.len(), 4);
    assert!(lines[3].ends_with("Long operation at iteration 3000"));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("completed=1"), "{stderr}");
}

#[test]
fn duration_bounds_an_endless_demo() {
    let out = csp(&["all", "--interval-ms", "5", "--duration-ms", "100"]);
    let lines = stdout_lines(&out);
    assert!(lines.iter().any(|l| l == "Third value is 3"), "{lines:?}");
    assert!(lines.iter().any(|l| l.ends_with("Received pong")));
}

#[test]
fn invalid_config_is_an_error() {
    let dir = std::env::temp_dir().join("csp_cli_test_config");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("bad.toml");
    std::fs::write(&path, "time_slice = 5\n").unwrap();

    let out = csp_command()
        .args(["basic", "--config"])
        .arg(&path)
        .output()
        .expect("failed to run csp");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("bad.toml"), "{stderr}");
}

#[test]
fn inherited_settings_are_cleared() {
    let cmd = csp_command();
    let removed: Vec<_> = cmd
        .get_envs()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| k.to_os_string())
        .collect();
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("CSP_") {
            assert!(removed.contains(&key), "{key:?} leaks into csp");
        }
    }
}

#[test]
fn duration_can_come_from_the_environment() {
    let out = csp_command()
        .args(["ping-pong", "--interval-ms", "5"])
        .env("CSP_DURATION_MS", "50")
        .output()
        .expect("failed to run csp");
    assert!(out.status.success());
    let lines = stdout_lines(&out);
    assert!(lines.iter().any(|l| l.ends_with("Sent ping")), "{lines:?}");
}
