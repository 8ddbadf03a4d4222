//! CLI subprocess integration tests.
//!
//! These invoke the `dockvault` binary against a backup root seeded in-process
//! with the mock engine, and check exit codes, stdout and JSON output.

use dockvault_core::{BackupManager, BackupRequest};
use dockvault_engine::MockEngine;
use dockvault_schema::{BackupRecord, ContainerSnapshot, ContainerStatus, FILESYSTEM_ARTIFACT};
use dockvault_store::BackupLayout;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;

struct Fixture {
    home: tempfile::TempDir,
    root: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            home: tempfile::tempdir().unwrap(),
            root: tempfile::tempdir().unwrap(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_dockvault"));
        // The mock engine needs no docker binary on PATH.
        cmd.env("DOCKVAULT_SKIP_PREREQS", "1");
        cmd.env("HOME", self.home.path());
        cmd.env_remove("DOCKVAULT_ENGINE");
        cmd.env_remove("DOCKVAULT_LOG");
        cmd.arg("--backup-dir").arg(self.root.path());
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().unwrap()
    }

    /// Back up a mock `web` container into the fixture's backup root.
    fn seed(&self) -> BackupRecord {
        let engine = Arc::new(MockEngine::new());
        engine.add_image(&["nginx:1.25"]);
        engine.add_container(
            ContainerSnapshot {
                name: "web".to_owned(),
                image: "nginx:1.25".to_owned(),
                status: ContainerStatus::Running,
                env: vec!["MODE=prod".to_owned()],
                ..Default::default()
            },
            &[("etc/nginx/nginx.conf", b"worker_processes 2;\n")],
        );
        let manager = BackupManager::new(engine, BackupLayout::new(self.root.path()));
        manager.create_backup(&BackupRequest::new("web")).unwrap()
    }

    fn write_config(&self, body: &str) -> std::path::PathBuf {
        let path = self.home.path().join("dockvault.toml");
        std::fs::write(&path, body).unwrap();
        path
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn parse_json(output: &Output) -> serde_json::Value {
    serde_json::from_str(&stdout(output))
        .unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {}", stdout(output)))
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_dockvault"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("dockvault"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_dockvault"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for cmd in ["backup", "restore", "list", "verify", "cleanup", "push", "pull"] {
        assert!(text.contains(cmd), "help must list '{cmd}': {text}");
    }
}

#[test]
fn cli_completions_bash() {
    let f = Fixture::new();
    let output = f.run(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("dockvault"));
}

#[test]
fn cli_list_empty_root() {
    let f = Fixture::new();
    let output = f.run(&["list"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("no backups found"));
}

#[test]
fn cli_list_json_contains_seeded_backup() {
    let f = Fixture::new();
    let record = f.seed();
    let output = f.run(&["--json", "list"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json = parse_json(&output);
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["backup_id"], record.backup_id.as_str());
    assert_eq!(entries[0]["container_name"], "web");
    assert_eq!(entries[0]["backup_type"], "full");
}

#[test]
fn cli_list_filters_by_container() {
    let f = Fixture::new();
    f.seed();
    let output = f.run(&["--json", "list", "--container", "db"]);
    assert!(output.status.success());
    assert_eq!(parse_json(&output), serde_json::json!([]));
}

#[test]
fn cli_inspect_shows_metadata() {
    let f = Fixture::new();
    let record = f.seed();
    let output = f.run(&["--json", "inspect", record.backup_id.as_str()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json = parse_json(&output);
    assert_eq!(json["container_name"], "web");
    let files = json["files"].as_array().unwrap();
    assert!(files.iter().any(|f| f == FILESYSTEM_ARTIFACT));
}

#[test]
fn cli_inspect_unknown_backup_is_store_error() {
    let f = Fixture::new();
    let output = f.run(&["inspect", "nope_20250101_000000"]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("store error"));
}

#[test]
fn cli_verify_passes_then_detects_tamper() {
    let f = Fixture::new();
    let record = f.seed();
    let id = record.backup_id.as_str();

    let output = f.run(&["verify", id]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("files passed"));

    let artifact = BackupLayout::new(f.root.path()).artifact_path(id, FILESYSTEM_ARTIFACT);
    std::fs::write(&artifact, b"not the original bytes").unwrap();

    let output = f.run(&["verify", id]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stdout(&output).contains(FILESYSTEM_ARTIFACT));
}

#[test]
fn cli_preview_json() {
    let f = Fixture::new();
    let record = f.seed();
    let output = f.run(&["--json", "preview", record.backup_id.as_str()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json = parse_json(&output);
    assert_eq!(json["image"], "nginx:1.25");
    assert_eq!(json["valid"], true);
    assert_eq!(json["environment_variables"], 1);
}

#[test]
fn cli_delete_removes_backup() {
    let f = Fixture::new();
    let record = f.seed();
    let id = record.backup_id.as_str();
    let output = f.run(&["delete", id]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(!BackupLayout::new(f.root.path()).backup_dir(id).exists());

    let output = f.run(&["delete", id]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn cli_cleanup_dry_run_keeps_recent() {
    let f = Fixture::new();
    f.seed();
    let output = f.run(&["--json", "cleanup", "--days", "30", "--dry-run"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json = parse_json(&output);
    assert_eq!(json["dry_run"], true);
    assert_eq!(json["expired"], serde_json::json!([]));
}

#[test]
fn cli_backup_missing_container_is_engine_error() {
    let f = Fixture::new();
    let output = f
        .cmd()
        .env("DOCKVAULT_ENGINE", "mock")
        .args(["backup", "ghost"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(5), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("ghost"));
}

#[test]
fn cli_unknown_engine_is_config_error() {
    let f = Fixture::new();
    let output = f
        .cmd()
        .env("DOCKVAULT_ENGINE", "podman-ng")
        .args(["list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_missing_explicit_config_is_config_error() {
    let f = Fixture::new();
    let missing = f.home.path().join("absent.toml");
    let output = f
        .cmd()
        .arg("--config")
        .arg(&missing)
        .arg("list")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_push_without_storage_is_config_error() {
    let f = Fixture::new();
    let record = f.seed();
    let output = f.run(&["push", record.backup_id.as_str()]);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("[storage]"));
}

fn local_storage_config(f: &Fixture, remote: &Path) -> std::path::PathBuf {
    f.write_config(&format!(
        "[storage]\nkind = \"local\"\npath = \"{}\"\n",
        remote.display()
    ))
}

#[test]
fn cli_push_then_pull_into_fresh_root() {
    let f = Fixture::new();
    let record = f.seed();
    let id = record.backup_id.as_str();
    let remote = tempfile::tempdir().unwrap();
    let config = local_storage_config(&f, remote.path());

    let output = f
        .cmd()
        .arg("--config")
        .arg(&config)
        .args(["--json", "push", id])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(parse_json(&output)["files_pushed"].as_u64().unwrap() >= 2);

    let output = f
        .cmd()
        .arg("--config")
        .arg(&config)
        .args(["--json", "pull"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(parse_json(&output), serde_json::json!([id]));

    // Pull into a second, empty backup root.
    let fresh = Fixture::new();
    let config = local_storage_config(&fresh, remote.path());
    let output = fresh
        .cmd()
        .arg("--config")
        .arg(&config)
        .args(["--json", "pull", id])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(parse_json(&output)["container_name"], "web");

    let output = fresh.run(&["verify", id]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}
