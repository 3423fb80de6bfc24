//! Integration tests for the `voxhost` binary entry point.
//!
//! Covers help output, usage errors and the read-only `status` command
//! against an empty installation root.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn help_lists_the_commands() {
    let mut command = cargo_bin_cmd!("voxhost");
    command.arg("--help");
    command
        .assert()
        .success()
        .stdout(contains("setup").and(contains("teardown")).and(contains("status")));
}

#[test]
fn unknown_command_exits_with_failure() {
    let mut command = cargo_bin_cmd!("voxhost");
    command.arg("restart");
    command
        .assert()
        .failure()
        .code(1)
        .stderr(contains("unrecognized subcommand"));
}

#[test]
fn malformed_port_is_a_configuration_error() {
    let mut command = cargo_bin_cmd!("voxhost");
    command.args(["--stt-port", "not-a-port", "status"]);
    command
        .assert()
        .failure()
        .code(1)
        .stderr(contains("failed to load configuration"));
}

#[test]
fn status_reports_both_services_on_an_empty_host() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let units = TempDir::new()?;
    let mut command = cargo_bin_cmd!("voxhost");
    command
        .env("VOXHOST_INSTALL_ROOT", root.path())
        .env("VOXHOST_UNIT_DIR", units.path())
        .env("VOXHOST_STT_PORT", "1")
        .env("VOXHOST_TTS_PORT", "2")
        .env("VOXHOST_PROBE_TIMEOUT_MS", "200")
        .arg("status");
    command
        .assert()
        .success()
        .stdout(contains("whisper (voxhost-whisper.service): process stopped, health unhealthy"))
        .stdout(contains("kokoro (voxhost-kokoro.service): process stopped, health unhealthy"));
    Ok(())
}
