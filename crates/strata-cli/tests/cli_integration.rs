//! CLI subprocess integration tests.
//!
//! These tests invoke the `strata` binary as a subprocess against a store
//! populated through the library crates, and verify exit codes, stdout
//! content, and JSON output.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use strata_core::Engine;
use strata_schema::DescriptorExt;
use strata_store::{ContainerRecord, Context, Snapshotter};

struct Store {
    dir: tempfile::TempDir,
}

impl Store {
    /// A store with a committed `base` snapshot in the default namespace.
    fn new() -> Self {
        let store = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        let ctx = Context::background();
        let engine = store.engine();
        engine.initialize().unwrap();
        let sn = engine.snapshot_service(&ctx, "overlayfs").unwrap();
        let mounts = sn.prepare(&ctx, "base-work", None, BTreeMap::new()).unwrap();
        fs::write(mounts[0].source.join("os-release"), "ID=strata\n").unwrap();
        sn.commit(&ctx, "base", "base-work").unwrap();
        store
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn store_path(&self) -> String {
        self.root().join("store").to_string_lossy().into_owned()
    }

    fn engine(&self) -> Engine {
        Engine::new(self.root().join("store"))
    }

    fn container(&self, id: &str, file: &str) {
        let ctx = Context::background();
        let engine = self.engine();
        let sn = engine.snapshot_service(&ctx, "overlayfs").unwrap();
        let key = format!("{id}-rootfs");
        let mounts = sn.prepare(&ctx, &key, Some("base"), BTreeMap::new()).unwrap();
        fs::write(mounts[0].source.join(file), "data\n").unwrap();
        engine
            .containers(&ctx)
            .put(&ContainerRecord::new(id, "overlayfs", key))
            .unwrap();
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_strata"))
            .env("HOME", self.root())
            .env_remove("STRATA_CONFIG")
            .env_remove("STRATA_LOG")
            .arg("--store")
            .arg(self.store_path())
            .args(args)
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success(), "strata --version must exit 0");
    assert!(stdout(&output).contains("strata"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("commit"), "help must list 'commit' command");
    assert!(out.contains("snapshot"), "help must list 'snapshot' command");
}

#[test]
fn cli_commit_prints_image_id() {
    let store = Store::new();
    store.container("c0ffee42", "hello.txt");

    let output = store.run(&[
        "commit",
        "-m",
        "first",
        "-c",
        r#"CMD ["cat","/hello.txt"]"#,
        "c0ffee",
        "app:v1",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1, "stdout must hold exactly the image id: {out}");
    assert!(lines[0].starts_with("sha256:"));

    let engine = store.engine();
    let ctx = Context::background();
    let image = engine.images(&ctx).get("docker.io/library/app:v1").unwrap();
    let manifest: serde_json::Value = engine
        .content()
        .get_json(&image.target.blob_digest())
        .unwrap();
    assert_eq!(manifest["config"]["digest"], lines[0]);
}

#[test]
fn cli_commit_ambiguous_prefix_exits_input_error() {
    let store = Store::new();
    store.container("abc111", "a");
    store.container("abc222", "b");

    let output = store.run(&["commit", "abc", "app:v1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("multiple IDs found with provided prefix: abc"));
}

#[test]
fn cli_commit_unknown_container_exits_input_error() {
    let store = Store::new();
    let output = store.run(&["commit", "nothere", "app:v1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("no such container nothere"));
}

#[test]
fn cli_commit_rejects_unknown_directive() {
    let store = Store::new();
    store.container("abc111", "a");
    let output = store.run(&["commit", "-c", "FOO bar", "abc111", "app:v1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("unknown change directive"));
}

#[test]
fn cli_commit_rejects_unknown_compression() {
    let store = Store::new();
    let output = store.run(&["commit", "--compression", "brotli", "abc111", "app:v1"]);
    assert!(!output.status.success());
}

#[test]
fn cli_commit_with_zstd_and_pause_flag() {
    let store = Store::new();
    store.container("abc111", "a");
    let output = store.run(&[
        "commit",
        "--compression",
        "zstd",
        "--pause=false",
        "abc111",
        "app:zstd",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let engine = store.engine();
    let ctx = Context::background();
    let image = engine.images(&ctx).get("docker.io/library/app:zstd").unwrap();
    let manifest: serde_json::Value = engine
        .content()
        .get_json(&image.target.blob_digest())
        .unwrap();
    assert_eq!(
        manifest["layers"][0]["mediaType"],
        "application/vnd.oci.image.layer.v1.tar+zstd"
    );
}

#[test]
fn cli_snapshot_ls_json() {
    let store = Store::new();
    store.container("abc111", "a");

    let output = store.run(&["--json", "snapshot", "ls"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let items: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let names: Vec<&str> = items
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["abc111-rootfs", "base"]);
    assert_eq!(items[0]["parent"], "base");
    assert_eq!(items[0]["snapshotter"], "overlayfs");
}

#[test]
fn cli_snapshot_ls_table() {
    let store = Store::new();
    let output = store.run(&["snapshot", "ls"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.starts_with("KEY"));
    assert!(out.contains("base"));
}

#[test]
fn cli_snapshot_info_reports_usage() {
    let store = Store::new();
    let output = store.run(&["snapshot", "info", "base"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let info: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(info["name"], "base");
    assert_eq!(info["kind"], "committed");
    assert_eq!(info["usage"]["size"], 10);
}

#[test]
fn cli_snapshot_info_missing_exits_input_error() {
    let store = Store::new();
    let output = store.run(&["snapshot", "info", "ghost"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("failed to get snapshot info"));
}

#[test]
fn cli_snapshot_update_merges_labels() {
    let store = Store::new();
    let output = store.run(&["snapshot", "update", "base", "team=infra", "tier="]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "Successfully updated snapshot base\n");

    let output = store.run(&["snapshot", "info", "base"]);
    let info: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(info["labels"]["team"], "infra");
    assert_eq!(info["labels"]["tier"], "");
}

#[test]
fn cli_snapshot_update_bad_label_exits_input_error() {
    let store = Store::new();
    let output = store.run(&["snapshot", "update", "base", "novalue"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("invalid label format"));
}

#[test]
fn cli_namespace_flag_isolates_snapshots() {
    let store = Store::new();
    let output = store.run(&["--namespace", "other", "--json", "snapshot", "ls"]);
    assert!(output.status.success());
    let items: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(items.as_array().unwrap().is_empty());
}

#[test]
fn cli_config_file_sets_namespace() {
    let store = Store::new();
    let config = store.root().join("config.json");
    fs::write(&config, r#"{"namespace": "other"}"#).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .env("HOME", store.root())
        .env("STRATA_CONFIG", &config)
        .arg("--store")
        .arg(store.store_path())
        .args(["--json", "snapshot", "ls"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let items: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(items.as_array().unwrap().is_empty());
}

#[test]
fn cli_malformed_config_exits_input_error() {
    let store = Store::new();
    let config = store.root().join("config.json");
    fs::write(&config, "not json").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .env("HOME", store.root())
        .env("STRATA_CONFIG", &config)
        .args(["snapshot", "ls"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
