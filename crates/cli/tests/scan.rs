//! End-to-end tests of the `scan` subcommand.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn cmd() -> Command {
    Command::cargo_bin("tainttrail").expect("binary")
}

#[test]
fn scan_reports_a_taint_flow() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("index.php"),
        "<?php\n$x = $_GET['q'];\necho $x;\n",
    )
    .unwrap();

    cmd()
        .args(["scan", dir.path().to_str().unwrap(), "--no-cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HTML"))
        .stdout(predicate::str::contains("1 finding(s)."));
}

#[test]
fn scan_clean_code_finds_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("index.php"),
        "<?php\necho htmlspecialchars($_GET['q']);\n",
    )
    .unwrap();

    cmd()
        .args(["scan", dir.path().to_str().unwrap(), "--no-cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No taint flows found."));
}

#[test]
fn json_format_emits_findings_array() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("a.php"), "<?php echo $_GET['q'];\n").unwrap();

    let output = cmd()
        .args([
            "scan",
            dir.path().to_str().unwrap(),
            "--no-cache",
            "--format",
            "json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(value["findings"][0]["category"], "html");
}

#[test]
fn fail_on_exits_nonzero_when_findings_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("a.php"), "<?php echo $_GET['q'];\n").unwrap();

    cmd()
        .args([
            "scan",
            dir.path().to_str().unwrap(),
            "--no-cache",
            "--fail-on",
        ])
        .assert()
        .failure();
}

#[test]
fn missing_path_is_an_error() {
    cmd()
        .args(["scan", "/definitely/not/a/real/path"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("path does not exist"));
}

#[test]
fn dump_contracts_prints_function_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("a.php"),
        "<?php\nfunction wrap($s) { return \"<b>$s</b>\"; }\necho wrap($_GET['q']);\n",
    )
    .unwrap();

    cmd()
        .args([
            "scan",
            dir.path().to_str().unwrap(),
            "--no-cache",
            "--dump-contracts",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("wrap"));
}
