//! Surface-level CLI tests: argument handling and the commands that need
//! no provisioned engines.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sass-compat-cli-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn sass_compat() -> Command {
    Command::cargo_bin("sass-compat").unwrap()
}

#[test]
fn clean_on_empty_store_removes_nothing() {
    let store = scratch("clean");
    sass_compat()
        .args(["--store", store.to_str().unwrap(), "clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 artifacts."));
}

#[test]
fn stats_before_any_build_advises_building() {
    let store = scratch("stats");
    sass_compat()
        .args(["--store", store.to_str().unwrap(), "stats"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No stats built yet"));
}

#[test]
fn unknown_build_target_is_a_usage_error() {
    let store = scratch("target");
    sass_compat()
        .args(["--store", store.to_str().unwrap(), "build", "everything"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown target 'everything'"));
}

#[test]
fn build_without_a_catalog_fails_fast() {
    let store = scratch("no-catalog");
    sass_compat()
        .args([
            "--store",
            store.to_str().unwrap(),
            "--catalog",
            "/nonexistent/sass-compat-fixtures",
            "build",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("test catalog unavailable"));
}
