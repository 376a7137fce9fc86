//! End-to-end tests driving the `spider` binary as a subprocess.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_flag_shows_usage() {
    Command::cargo_bin("spider")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Runs one crawler spider"));
}

#[test]
fn version_flag_succeeds() {
    Command::cargo_bin("spider").unwrap().arg("--version").assert().success();
}

#[test]
fn unknown_flag_is_rejected() {
    Command::cargo_bin("spider")
        .unwrap()
        .arg("--not-a-real-flag")
        .assert()
        .failure();
}

#[test]
fn no_seed_urls_and_no_stdin_exits_cleanly() {
    Command::cargo_bin("spider")
        .unwrap()
        .write_stdin("")
        .assert()
        .success();
}

#[test]
fn crawls_a_seed_url_and_prints_stdout_sink_output() {
    Command::cargo_bin("spider")
        .unwrap()
        .args(["--storage", "stdout", "--empty-sleep-time", "1", "https://example.com/page"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://example.com/page"));
}

#[test]
fn rejects_invalid_speed_override() {
    Command::cargo_bin("spider")
        .unwrap()
        .args(["--speed", "0", "https://example.com"])
        .assert()
        .failure();
}

#[test]
fn rejects_unregistered_storage_name() {
    Command::cargo_bin("spider")
        .unwrap()
        .args(["--storage", "no-such-sink", "--empty-sleep-time", "1", "https://example.com"])
        .assert()
        .failure();
}

#[test]
fn config_file_override_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "empty_sleep_time = 1\nstorage = \"stdout\"\n").unwrap();

    Command::cargo_bin("spider")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "https://example.com/from-file"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://example.com/from-file"));
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "bogus_key = 1\n").unwrap();

    Command::cargo_bin("spider")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "https://example.com"])
        .assert()
        .failure();
}
