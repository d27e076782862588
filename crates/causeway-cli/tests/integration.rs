//! Integration tests for the causeway CLI
//!
//! These tests exercise full CLI workflows against a temporary workspace with a
//! small interchange file. HOME points into the temp directory so the global
//! configuration never leaks in.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

const ASTHMA: &str = r#"[
  {
    "subject_name": "Smoking", "subject_cui": "C0037369",
    "predicate": "CAUSES",
    "object_name": "Asthma", "object_cui": "C0004096",
    "evidence_count": 2, "relationship_degree": "1",
    "pmid_data": {
      "1001": { "sentences": ["Smoking worsens asthma."] },
      "9999": { "sentences": ["A shared review sentence."] }
    }
  },
  {
    "subject_name": "Obesity", "subject_cui": "C0028754",
    "predicate": "PREDISPOSES",
    "object_name": "Asthma", "object_cui": "C0004096",
    "evidence_count": 1, "relationship_degree": "2",
    "pmid_data": {
      "1002": { "sentences": ["Obesity is linked to asthma."] },
      "9999": { "sentences": ["A shared review sentence."] }
    }
  },
  {
    "subject_name": "Pollen", "subject_cui": "C0032385",
    "predicate": "CAUSES",
    "object_name": "Asthma", "object_cui": "C0004096",
    "evidence_count": 3, "relationship_degree": "1",
    "pmid_data": {
      "1003": { "sentences": ["Pollen triggers asthma attacks."] }
    }
  }
]
"#;

/// Get a Command for the causeway binary, isolated to `workspace`
#[allow(deprecated)]
fn causeway(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin("causeway").expect("Failed to find causeway binary");
    cmd.env("HOME", workspace.join("home"))
        .env_remove("CAUSEWAY_WORKSPACE")
        .env_remove("CAUSEWAY_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--workspace")
        .arg(workspace);
    cmd
}

/// Create a temporary workspace holding `asthma.json`
fn setup_workspace() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(temp.path().join("home")).unwrap();
    std::fs::write(temp.path().join("asthma.json"), ASTHMA).unwrap();
    temp
}

/// Run with `--json` and parse stdout
fn run_json(workspace: &Path, args: &[&str]) -> Value {
    let output = causeway(workspace)
        .arg("--json")
        .args(args)
        .output()
        .expect("Failed to run causeway");
    assert!(
        output.status.success(),
        "causeway {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

// ============================================================================
// Load Command Integration Tests
// ============================================================================

#[test]
fn test_load_reports_strategy_and_cache() {
    let workspace = setup_workspace();
    let ws = workspace.path();

    let first = run_json(ws, &["load", "asthma.json"]);
    assert_eq!(first["success"], true);
    assert_eq!(first["strategy"], "full-eager");
    assert_eq!(first["records"], 3);
    assert_eq!(first["full_records"], true);

    // A new process finds the persisted entry
    let second = run_json(ws, &["load", "asthma.json"]);
    assert_eq!(second["from_cache"], "Disk");
    assert_eq!(second["records"], 3);
}

#[test]
fn test_load_by_identity() {
    let workspace = setup_workspace();

    let summary = run_json(workspace.path(), &["load", "asthma", "--show", "2"]);
    assert_eq!(summary["success"], true);
    assert_eq!(summary["preview"].as_array().unwrap().len(), 2);
    assert_eq!(summary["preview"][0]["subject_name"], "Smoking");
}

#[test]
fn test_load_with_size_hint_streams() {
    let workspace = setup_workspace();

    let summary = run_json(
        workspace.path(),
        &["--no-cache", "load", "asthma.json", "--size-hint-mb", "500"],
    );
    assert_eq!(summary["strategy"], "streaming");
    assert_eq!(summary["full_records"], false);
    assert_eq!(summary["records"], 3);
}

#[test]
fn test_load_missing_file_fails() {
    let workspace = setup_workspace();

    causeway(workspace.path())
        .args(["--quiet", "load", "missing.json"])
        .assert()
        .failure();
}

#[test]
fn test_load_text_output() {
    let workspace = setup_workspace();

    causeway(workspace.path())
        .args(["--quiet", "load", "asthma.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 3 records"))
        .stdout(predicate::str::contains("full-eager"));
}

// ============================================================================
// Lookup Command Integration Tests
// ============================================================================

#[test]
fn test_lookup_edge() {
    let workspace = setup_workspace();

    let found = run_json(workspace.path(), &["lookup", "asthma", "obesity", "ASTHMA"]);
    assert_eq!(found["entry"]["position"], 1);
    assert_eq!(found["record"]["subject_id"], "C0028754");
}

#[test]
fn test_lookup_prints_sentences() {
    let workspace = setup_workspace();

    causeway(workspace.path())
        .args(["--quiet", "lookup", "asthma.json", "Pollen", "Asthma", "-s"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pollen triggers asthma attacks."));
}

#[test]
fn test_lookup_missing_edge_fails() {
    let workspace = setup_workspace();

    causeway(workspace.path())
        .args(["--quiet", "lookup", "asthma.json", "Dust", "Asthma"])
        .assert()
        .failure();
}

// ============================================================================
// Snapshot Command Integration Tests
// ============================================================================

#[test]
fn test_snapshot_build_inspect_and_load() {
    let workspace = setup_workspace();
    let ws = workspace.path();
    let source = ws.join("asthma.json").display().to_string();

    let built = run_json(ws, &["snapshot", "build", &source]);
    assert_eq!(built["records"], 3);
    assert!(ws.join("asthma.cwsnap").exists());

    let inspected = run_json(ws, &["snapshot", "inspect", &source, "--verify"]);
    assert_eq!(inspected["kind"], "Records");
    assert_eq!(inspected["records"], 3);
    assert_eq!(inspected["lossy"], false);

    // A fresh snapshot wins over the source
    let loaded = run_json(ws, &["--no-cache", "load", "asthma.json"]);
    assert_eq!(loaded["strategy"], "snapshot");
    assert_eq!(loaded["records"], 3);
}

#[test]
fn test_snapshot_inspect_missing_fails() {
    let workspace = setup_workspace();

    causeway(workspace.path())
        .args(["snapshot", "inspect", "nothing.cwsnap"])
        .assert()
        .failure();
}

// ============================================================================
// Compact and Expand Integration Tests
// ============================================================================

#[test]
fn test_compact_then_expand() {
    let workspace = setup_workspace();
    let ws = workspace.path();
    let source = ws.join("asthma.json").display().to_string();

    let compacted = run_json(ws, &["compact", &source]);
    assert_eq!(compacted["stats"]["records"], 3);
    // Three own sentences plus the shared review sentence
    assert_eq!(compacted["stats"]["unique_sentences"], 4);
    let output = compacted["output"].as_str().unwrap().to_string();

    let expanded = run_json(ws, &["expand", &output]);
    assert_eq!(expanded["records"], 3);
    assert_eq!(expanded["lossy"], true);
    assert!(ws.join("asthma.compact.expanded.json").exists());
}

#[test]
fn test_expand_warns_about_lossy_fields() {
    let workspace = setup_workspace();
    let ws = workspace.path();
    let source = ws.join("asthma.json").display().to_string();
    let ultra = ws.join("ultra.json").display().to_string();

    causeway(ws)
        .args(["--quiet", "compact", &source, "--ultra", "-o", &ultra])
        .assert()
        .success()
        .stdout(predicate::str::contains("entities:  4"));

    causeway(ws)
        .args(["--quiet", "expand", &ultra])
        .assert()
        .success()
        .stderr(predicate::str::contains("predicate"));
}

// ============================================================================
// Cache Command Integration Tests
// ============================================================================

#[test]
fn test_cache_stats_clear_prune() {
    let workspace = setup_workspace();
    let ws = workspace.path();

    let empty = run_json(ws, &["cache", "stats"]);
    assert_eq!(empty["exists"], false);

    run_json(ws, &["load", "asthma.json"]);
    let stats = run_json(ws, &["cache", "stats"]);
    assert_eq!(stats["exists"], true);
    assert_eq!(stats["disk_files"], 1);

    let pruned = run_json(ws, &["cache", "prune"]);
    assert_eq!(pruned["stale_entries"], 0);

    let cleared = run_json(ws, &["cache", "clear"]);
    assert_eq!(cleared["removed"], 1);
    assert_eq!(run_json(ws, &["cache", "stats"])["disk_files"], 0);
}

#[test]
fn test_no_cache_leaves_no_cache_dir() {
    let workspace = setup_workspace();
    let ws = workspace.path();

    run_json(ws, &["--no-cache", "load", "asthma.json"]);
    assert!(!ws.join(".causeway/cache").exists());
}

// ============================================================================
// Config Command Integration Tests
// ============================================================================

#[test]
fn test_config_init_and_path() {
    let workspace = setup_workspace();
    let ws = workspace.path();

    let before = run_json(ws, &["config", "path"]);
    assert_eq!(before["local_exists"], false);
    assert_eq!(before["global_exists"], false);

    run_json(ws, &["config", "init"]);
    assert!(ws.join(".causeway/config.toml").exists());

    run_json(ws, &["config", "init", "--global"]);
    assert!(ws.join("home/.causeway/config.toml").exists());

    let after = run_json(ws, &["config", "path"]);
    assert_eq!(after["local_exists"], true);
    assert_eq!(after["global_exists"], true);
}

#[test]
fn test_config_show_sources() {
    let workspace = setup_workspace();
    let ws = workspace.path();
    std::fs::create_dir_all(ws.join(".causeway")).unwrap();
    std::fs::write(
        ws.join(".causeway/config.toml"),
        "[cache]\nmax_items = 4\n",
    )
    .unwrap();

    let values = run_json(ws, &["config", "show"]);
    let max_items = values
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["key"] == "cache.max_items")
        .expect("cache.max_items listed");
    assert_eq!(max_items["value"], 4);
    assert_eq!(max_items["source"], "local");
}

#[test]
fn test_named_source_from_config() {
    let workspace = setup_workspace();
    let ws = workspace.path();
    std::fs::create_dir_all(ws.join("data")).unwrap();
    std::fs::rename(ws.join("asthma.json"), ws.join("data/asthma-set.json")).unwrap();
    std::fs::create_dir_all(ws.join(".causeway")).unwrap();
    std::fs::write(
        ws.join(".causeway/config.toml"),
        "[sources.named]\nasthma = \"data/asthma-set.json\"\n",
    )
    .unwrap();

    let summary = run_json(ws, &["load", "asthma"]);
    assert_eq!(summary["success"], true);
    assert_eq!(summary["records"], 3);
}

#[test]
fn test_invalid_config_fails_load_but_not_config_path() {
    let workspace = setup_workspace();
    let ws = workspace.path();
    std::fs::create_dir_all(ws.join(".causeway")).unwrap();
    std::fs::write(ws.join(".causeway/config.toml"), "[cache]\nmax_items = 0\n").unwrap();

    causeway(ws)
        .args(["load", "asthma.json"])
        .assert()
        .failure();

    causeway(ws).args(["config", "path"]).assert().success();
}
