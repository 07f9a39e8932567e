//! End-to-end CLI integration tests.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn chainscript() -> Command {
    Command::cargo_bin("chainscript").expect("binary built")
}

fn contract_file(dir: &tempfile::TempDir, name: &str, code: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, code).expect("write contract");
    path
}

#[test]
fn help_lists_the_subcommands() {
    chainscript()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("query"));
}

#[test]
fn check_accepts_valid_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = contract_file(&dir, "ok.js", "function main(input) { callBackLog(input); }\n");

    chainscript()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("source check passed"));
}

#[test]
fn check_rejects_syntax_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = contract_file(&dir, "broken.js", "function main( {\n");

    chainscript()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("compile failed"));
}

#[test]
fn strict_check_requires_main() {
    let dir = tempfile::tempdir().unwrap();
    let path = contract_file(&dir, "no_entry.js", "var x = 1;\n");

    chainscript()
        .arg("check")
        .arg(&path)
        .assert()
        .success();

    chainscript()
        .args(["check", "--require-entry"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing or not a function"));
}

#[test]
fn run_prints_contract_logs() {
    let dir = tempfile::tempdir().unwrap();
    let path = contract_file(
        &dir,
        "hello.js",
        r#"function main(input) { callBackLog("hello " + input); }"#,
    );

    chainscript()
        .args(["run", "--input", "world"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[addr-contract] hello world"))
        .stdout(predicate::str::contains("execution succeeded"));
}

#[test]
fn run_reports_missing_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = contract_file(&dir, "no_entry.js", "var x = 1;\n");

    chainscript()
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing or not a function"));
}

#[test]
fn query_prints_the_result_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let path = contract_file(
        &dir,
        "answer.js",
        r#"function query(input) { return 5; }"#,
    );

    chainscript()
        .arg("query")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("valuePlain"));
}

#[test]
fn run_uses_libraries_from_the_jslib_flag() {
    let dir = tempfile::tempdir().unwrap();
    let jslib = tempfile::tempdir().unwrap();
    fs::write(
        jslib.path().join("greet.js"),
        "function greet(name) { return \"hi \" + name; }\n",
    )
    .unwrap();
    let path = contract_file(
        &dir,
        "uses_lib.js",
        r#"include("greet.js");
function main(input) { callBackLog(greet(input)); }"#,
    );

    chainscript()
        .args(["run", "--input", "ada"])
        .arg("--jslib")
        .arg(jslib.path())
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[addr-contract] hi ada"));
}
