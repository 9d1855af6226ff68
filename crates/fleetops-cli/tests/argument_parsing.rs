//! Focused CLI argument parsing tests — no server connectivity required.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_flag_shows_usage() {
    Command::cargo_bin("fleetops")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fleet control plane"));
}

#[test]
fn version_flag_succeeds() {
    Command::cargo_bin("fleetops").unwrap().arg("--version").assert().success();
}

#[test]
fn reboot_requires_a_machine_id() {
    Command::cargo_bin("fleetops")
        .unwrap()
        .args(["reboot"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn unknown_subcommand_fails() {
    Command::cargo_bin("fleetops").unwrap().arg("frobnicate").assert().failure();
}
