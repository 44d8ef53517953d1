//! Integration tests for the `cryptzone` CLI binary.
//!
//! These tests run the binary as a subprocess and check exit codes, stdout,
//! and what is left on disk afterwards.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;

/// Helper: locate the `cryptzone` binary built by `cargo test`.
fn cryptzone_bin() -> String {
    let path = env!("CARGO_BIN_EXE_cryptzone");
    assert!(
        Path::new(path).exists(),
        "cryptzone binary not found at {path}"
    );
    path.to_owned()
}

/// Helper: run cryptzone with args and return (`exit_code`, stdout, stderr).
fn run(args: &[&str]) -> (i32, String, String) {
    run_with_env(args, &[])
}

fn run_with_env(args: &[&str], env: &[(&str, &str)]) -> (i32, String, String) {
    let mut command = Command::new(cryptzone_bin());
    command
        .arg("--no-color")
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("CRYPTZONE_STORAGE")
        .env_remove("CRYPTZONE_ROOT")
        .env_remove("CRYPTZONE_ENCRYPTION")
        .env_remove("CRYPTZONE_KEY_BITS")
        .env_remove("CRYPTZONE_DISABLED")
        .env_remove("CRYPTZONE_LOG_JSON");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("failed to execute cryptzone");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("cryptzone"), "{stdout}");
}

#[test]
fn test_help_lists_subcommands() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("run"), "{stdout}");
    assert!(stdout.contains("formats"), "{stdout}");
    assert!(stdout.contains("CRYPTZONE_STORAGE"), "{stdout}");
}

// ── Formats ──────────────────────────────────────────────────────────

#[test]
fn test_formats_lists_every_format() {
    let (code, stdout, _) = run(&["formats"]);
    assert_eq!(code, 0);
    for name in ["textfile", "jsonfile", "rcfile", "sequencefile", "orc", "parquet", "avro"] {
        assert!(stdout.contains(name), "missing {name}: {stdout}");
    }
    let parquet = stdout.lines().find(|l| l.starts_with("parquet")).unwrap();
    assert!(parquet.contains("no codec"), "{parquet}");
    assert!(parquet.contains("read_encrypted_table"), "{parquet}");
}

// ── Run ──────────────────────────────────────────────────────────────

#[test]
fn test_run_default_passes_codecs_and_skips_parquet() {
    let (code, stdout, stderr) = run(&["run"]);
    assert_eq!(code, 0, "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("PASS        textfile (9 rows"), "{stdout}");
    assert!(stdout.contains("PASS        jsonfile"), "{stdout}");
    assert!(stdout.contains("PASS        rcfile"), "{stdout}");
    assert!(stdout.contains("SKIP        parquet"), "{stdout}");
    assert!(stdout.contains("3 passed, 1 skipped, 0 failed"), "{stdout}");
}

#[test]
fn test_run_unsupported_format_fails() {
    let (code, stdout, _) = run(&["run", "--format", "orc"]);
    assert_eq!(code, 1);
    assert!(stdout.contains("UNSUPPORTED orc"), "{stdout}");
}

#[test]
fn test_run_without_encryption_skips_everything() {
    let (code, stdout, _) = run_with_env(
        &["run", "--format", "textfile,rcfile"],
        &[("CRYPTZONE_ENCRYPTION", "false")],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("encryption is not supported"), "{stdout}");
    assert!(stdout.contains("0 passed, 2 skipped, 0 failed"), "{stdout}");
}

#[test]
fn test_run_json_output() {
    let (code, stdout, _) = run(&["run", "--format", "textfile,parquet", "--json", "--loop-size", "4"]);
    assert_eq!(code, 0);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["format"], "textfile");
    assert_eq!(results[0]["status"], "pass");
    assert_eq!(results[0]["rows"], 16);
    assert_eq!(results[1]["status"], "skip");
}

#[test]
fn test_run_custom_skip_list_from_env() {
    let (code, stdout, _) = run_with_env(
        &["run", "--format", "rcfile,parquet"],
        &[("CRYPTZONE_DISABLED", "rcfile:read_*")],
    );
    // parquet is no longer skip-listed, so it is reported as unsupported.
    assert_eq!(code, 1);
    assert!(stdout.contains("SKIP        rcfile"), "{stdout}");
    assert!(stdout.contains("UNSUPPORTED parquet"), "{stdout}");
}

#[test]
fn test_run_invalid_key_bits_errors() {
    let (code, _, stderr) = run(&["run", "--format", "textfile", "--key-bits", "64"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("invalid bit length"), "{stderr}");
}

#[test]
fn test_run_local_storage_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    let (code, stdout, stderr) = run(&[
        "--storage",
        "local",
        "--root",
        root.to_str().unwrap(),
        "run",
        "--format",
        "textfile,jsonfile,rcfile",
        "--key-bits",
        "256",
    ]);
    assert_eq!(code, 0, "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("3 passed, 0 skipped, 0 failed"), "{stdout}");

    // Teardown removed every table file; only the (now empty) catalog remains.
    let leftovers: Vec<_> = walk(&root.join("warehouse"));
    assert!(leftovers.is_empty(), "{leftovers:?}");
    assert!(root.join("_catalog").join("tables").exists());
}

fn walk(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}
