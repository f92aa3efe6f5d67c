//! Integration tests driving the `corvid` binary end to end: a script on
//! disk in, exit code and stdio out. Covers the three argv shapes and the
//! sysexits-style exit codes documented on `main`.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_script(dir: &TempDir, source: &str) -> std::path::PathBuf {
    let path = dir.path().join("script.crv");
    fs::write(&path, source).unwrap();
    path
}

#[test]
fn running_a_valid_script_prints_its_output_and_exits_zero() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, r#"print "hello" + " " + "world";"#);
    Command::cargo_bin("corvid")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn a_compile_error_exits_with_sysexits_dataerr() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "var = ;");
    Command::cargo_bin("corvid").unwrap().arg(&path).assert().code(65);
}

#[test]
fn a_runtime_error_exits_with_sysexits_software() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "print nope;");
    Command::cargo_bin("corvid")
        .unwrap()
        .arg(&path)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("Undefined variable 'nope'"));
}

#[test]
fn an_unreadable_path_exits_with_sysexits_ioerr() {
    Command::cargo_bin("corvid").unwrap().arg("/nonexistent/path/does-not-exist.crv").assert().code(74);
}

#[test]
fn more_than_one_argument_exits_with_sysexits_usage() {
    Command::cargo_bin("corvid")
        .unwrap()
        .arg("one")
        .arg("two")
        .assert()
        .code(64)
        .stderr(predicate::str::contains("Usage: corvid [path]"));
}
