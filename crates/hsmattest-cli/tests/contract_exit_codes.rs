#![allow(deprecated)]

//! CLI contract: stdout content and exit codes of `hsmattest`.

use assert_cmd::Command;
use flate2::write::GzEncoder;
use flate2::Compression;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};

const ATTESTATION: &str = r#"[{"pairs":{"Device Type":"HSM","Serial Number":"5334"}},{"name":"Key","pairs":{"Key Label":"signing-key"}}]"#;

fn echo_module() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../hsmattest-core/tests/fixtures/echo_parser.wat")
        .canonicalize()
        .expect("echo fixture")
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn hsmattest(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hsmattest").unwrap();
    cmd.current_dir(dir)
        .env_remove("HSMATTEST_CONFIG")
        .env_remove("HSMATTEST_MODULE")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn parse_prints_attributes_in_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cert.bin"), gzip(ATTESTATION.as_bytes())).unwrap();

    hsmattest(dir.path())
        .arg("parse")
        .arg("cert.bin")
        .arg("--module")
        .arg(echo_module())
        .assert()
        .success()
        .stdout(predicate::str::contains("== cert.bin"))
        .stdout(predicate::str::is_match(r"(?s)Device Type\s+HSM.*Serial Number\s+5334.*-- Key.*Key Label\s+signing-key").unwrap());
}

#[test]
fn parse_json_output_is_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.bin"), gzip(ATTESTATION.as_bytes())).unwrap();
    std::fs::write(dir.path().join("b.json"), ATTESTATION).unwrap();

    let output = hsmattest(dir.path())
        .args(["parse", "a.bin", "b.json", "--format", "json", "--module"])
        .arg(echo_module())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(output).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["file"]["name"], "a.bin");
    assert_eq!(records[1]["file"]["name"], "b.json");
    assert_eq!(
        records[0]["attestation"][0]["pairs"]["Serial Number"],
        "5334"
    );
}

#[test]
fn parse_failure_exits_with_no_attestation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.bin"), b"!not an attestation").unwrap();

    hsmattest(dir.path())
        .args(["parse", "bad.bin", "--module"])
        .arg(echo_module())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bad.bin: no attestation"));
}

#[test]
fn later_files_still_processed_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.bin"), b"!").unwrap();
    std::fs::write(dir.path().join("good.bin"), gzip(ATTESTATION.as_bytes())).unwrap();

    hsmattest(dir.path())
        .args(["parse", "bad.bin", "good.bin", "--module"])
        .arg(echo_module())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("== good.bin"));
}

#[test]
fn missing_input_file_exits_with_input_error() {
    let dir = tempfile::tempdir().unwrap();

    hsmattest(dir.path())
        .args(["parse", "missing.bin", "--module"])
        .arg(echo_module())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("missing.bin"));
}

#[test]
fn missing_module_exits_with_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cert.bin"), ATTESTATION).unwrap();

    hsmattest(dir.path())
        .args(["parse", "cert.bin"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no parsing module configured"));
}

#[test]
fn module_from_default_config_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cert.bin"), ATTESTATION).unwrap();
    std::fs::write(
        dir.path().join("hsmattest.yaml"),
        format!(
            "version: 1\nmodule: {}\ninput_ownership: module\n",
            echo_module().display()
        ),
    )
    .unwrap();

    hsmattest(dir.path())
        .args(["parse", "cert.bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Serial Number"));
}

#[test]
fn invalid_config_exits_with_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hsmattest.yaml"), "version: 9\n").unwrap();

    hsmattest(dir.path())
        .args(["parse", "cert.bin"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported config version 9"));
}

#[test]
fn inspect_reports_contract() {
    let dir = tempfile::tempdir().unwrap();

    hsmattest(dir.path())
        .args(["inspect", "--module"])
        .arg(echo_module())
        .assert()
        .success()
        .stdout(predicate::str::contains("multi-value"))
        .stdout(predicate::str::contains("env.consoleLog"))
        .stdout(predicate::str::contains("alloc"));
}

#[test]
fn normalize_writes_decompressed_bytes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cert.bin"), gzip(ATTESTATION.as_bytes())).unwrap();

    hsmattest(dir.path())
        .args(["normalize", "cert.bin", "-o", "cert.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("decompressed"));

    let written = std::fs::read_to_string(dir.path().join("cert.json")).unwrap();
    assert_eq!(written, ATTESTATION);
}

#[test]
fn normalize_passes_plain_input_through() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cert.json"), ATTESTATION).unwrap();

    hsmattest(dir.path())
        .args(["normalize", "cert.json", "-o", "out.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("passed through unchanged"));

    let written = std::fs::read_to_string(dir.path().join("out.json")).unwrap();
    assert_eq!(written, ATTESTATION);
}

#[test]
fn version_prints_package_version() {
    let dir = tempfile::tempdir().unwrap();

    hsmattest(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
