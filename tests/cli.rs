use std::fs;
use std::sync::Arc;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::{tempdir, TempDir};

use anitsu::bridge::{SessionPaths, SESSION_ENV};
use anitsu::catalog::Catalog;
use anitsu::config::{Config, ImageBackend};
use anitsu::session::Session;

fn anitsu(scratch: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("anitsu").expect("binary built");
    cmd.env("XDG_CACHE_HOME", scratch.path())
        .env("XDG_CONFIG_HOME", scratch.path())
        .env_remove(SESSION_ENV);
    cmd
}

fn write_config(scratch: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = scratch.path().join("config.yaml");
    fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn prints_version() {
    let scratch = tempdir().unwrap();
    anitsu(&scratch)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_the_control_commands() {
    let scratch = tempdir().unwrap();
    anitsu(&scratch)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reload"))
        .stdout(predicate::str::contains("download_folder"))
        .stdout(predicate::str::contains("update"));
}

#[test]
fn unknown_arguments_are_a_usage_error() {
    let scratch = tempdir().unwrap();
    anitsu(&scratch)
        .arg("bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn control_command_without_session_fails() {
    let scratch = tempdir().unwrap();
    anitsu(&scratch)
        .args(["reload", "Show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no running session"));
}

#[test]
fn control_command_with_dead_session_fails() {
    let scratch = tempdir().unwrap();
    anitsu(&scratch)
        .env(SESSION_ENV, scratch.path().join("anitsu.1"))
        .arg("files_only")
        .assert()
        .failure()
        .stderr(predicate::str::contains("bridge: connect"));
}

#[test]
fn missing_finder_is_fatal() {
    let scratch = tempdir().unwrap();
    let config = write_config(&scratch, "finder:\n  command: anitsu-no-such-finder\n");
    anitsu(&scratch)
        .arg("--config")
        .arg(config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found on PATH"));
}

#[test]
fn update_runs_the_configured_steps() {
    let scratch = tempdir().unwrap();
    let marker = scratch.path().join("images");
    let config = write_config(
        &scratch,
        &format!(
            "update:\n  steps: [[\"true\"]]\n  image_steps: [[\"touch\", \"{}\"]]\n",
            marker.display()
        ),
    );
    anitsu(&scratch)
        .arg("--config")
        .arg(&config)
        .args(["update", "-i"])
        .assert()
        .success();
    assert!(marker.exists());
}

#[test]
fn failing_update_step_fails_the_command() {
    let scratch = tempdir().unwrap();
    let config = write_config(&scratch, "update:\n  steps: [[\"false\"]]\n");
    anitsu(&scratch)
        .arg("--config")
        .arg(config)
        .arg("update")
        .assert()
        .failure()
        .stderr(predicate::str::contains("update step"));
}

#[test]
fn control_commands_talk_to_a_live_session() {
    let scratch = tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.image.backend = ImageBackend::None;
    cfg.preview.color = false;
    cfg.preview.covers_dir = None;
    let catalog = Catalog::from_json(json!({
        "Show (post-9)": {"e01.mkv (size-1500)": "http://x/1"},
        "loose.mkv (size-10)": "http://x/2"
    }))
    .unwrap();
    let paths = SessionPaths::new(scratch.path(), 7);
    let _session = Session::start(&cfg, Arc::new(catalog), paths.clone()).unwrap();

    anitsu(&scratch)
        .env(SESSION_ENV, paths.prefix())
        .args(["reload", "Show (post-9)"])
        .assert()
        .success()
        .stdout("e01.mkv (size-1500)\n..\n");

    anitsu(&scratch)
        .env(SESSION_ENV, paths.prefix())
        .args(["preview", "e01.mkv (size-1500)"])
        .assert()
        .success()
        .stdout("Total size: 1.50 KB\n1.50 KB   e01.mkv\n");

    anitsu(&scratch)
        .env(SESSION_ENV, paths.prefix())
        .arg("..")
        .assert()
        .success()
        .stdout("Show (post-9)\nloose.mkv (size-10)\n");
}
