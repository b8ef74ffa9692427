#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn triage(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("triage").unwrap();
    cmd.current_dir(dir.path())
        .env("TRIAGE_CONFIG", dir.path().join("triage.yaml"))
        .env_remove("RUST_LOG");
    cmd
}

fn shipped_dags() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../dags")
}

const MINI_GRAPH: &str = r#"
name: Mini
spec: test
steps:
  - order: 1
    actor: UE
    canonical_action: Registration Request
  - order: 2
    actor: AMF
    canonical_action: Authentication Request
  - order: 3
    actor: AMF
    canonical_action: Registration Accept
"#;

fn write_mini_graph(dir: &TempDir) -> PathBuf {
    let graphs = dir.path().join("graphs");
    std::fs::create_dir_all(&graphs).unwrap();
    std::fs::write(graphs.join("mini.yaml"), MINI_GRAPH).unwrap();
    graphs
}

// ---------------------------------------------------------------------------
// triage config
// ---------------------------------------------------------------------------

#[test]
fn config_show_prints_defaults_without_a_file() {
    let dir = TempDir::new().unwrap();
    triage(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_attempts: 2"))
        .stdout(predicate::str::contains("collection_mode: chained"));
}

#[test]
fn config_validate_accepts_defaults() {
    let dir = TempDir::new().unwrap();
    triage(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_rejects_zero_attempts() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("triage.yaml"),
        "orchestrator:\n  max_attempts: 0\n",
    )
    .unwrap();
    triage(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_init_writes_file_once() {
    let dir = TempDir::new().unwrap();
    triage(&dir).args(["config", "init"]).assert().success();
    assert!(dir.path().join("triage.yaml").exists());

    triage(&dir)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    triage(&dir)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// triage graph
// ---------------------------------------------------------------------------

#[test]
fn shipped_graphs_are_valid() {
    let dir = TempDir::new().unwrap();
    triage(&dir)
        .args(["graph", "validate", "--graph-dir"])
        .arg(shipped_dags())
        .assert()
        .success()
        .stdout(predicate::str::contains("3 reference graph(s) valid."));
}

#[test]
fn graph_list_shows_shipped_graphs() {
    let dir = TempDir::new().unwrap();
    triage(&dir)
        .args(["graph", "list", "--graph-dir"])
        .arg(shipped_dags())
        .assert()
        .success()
        .stdout(predicate::str::contains("Registration_General"))
        .stdout(predicate::str::contains("Authentication_5G_AKA"))
        .stdout(predicate::str::contains("PDU_Session_Establishment"));
}

#[test]
fn graph_show_lists_steps() {
    let dir = TempDir::new().unwrap();
    let graphs = write_mini_graph(&dir);
    triage(&dir)
        .args(["graph", "show", "Mini", "--graph-dir"])
        .arg(&graphs)
        .assert()
        .success()
        .stdout(predicate::str::contains("Authentication Request"));

    triage(&dir)
        .args(["graph", "show", "Nope", "--graph-dir"])
        .arg(&graphs)
        .assert()
        .failure()
        .stderr(predicate::str::contains("'Nope' not found"));
}

#[test]
fn graph_validate_reports_dangling_sub_graph() {
    let dir = TempDir::new().unwrap();
    let graphs = dir.path().join("graphs");
    std::fs::create_dir_all(&graphs).unwrap();
    std::fs::write(
        graphs.join("parent.yaml"),
        "name: Parent\nsteps:\n  - order: 1\n    actor: AMF\n    canonical_action: Start\n    sub_graph: Missing\n",
    )
    .unwrap();
    triage(&dir)
        .args(["graph", "validate", "--graph-dir"])
        .arg(&graphs)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown graph 'Missing'"));
}

// ---------------------------------------------------------------------------
// triage detect
// ---------------------------------------------------------------------------

#[test]
fn detect_reports_conforming_trace() {
    let dir = TempDir::new().unwrap();
    let graphs = write_mini_graph(&dir);
    let trace = dir.path().join("trace.yaml");
    std::fs::write(
        &trace,
        "- {order: 1, actor: UE, action: \"Registration Request (SUCI)\"}\n\
         - {order: 3, actor: AMF, action: Registration Accept}\n",
    )
    .unwrap();

    triage(&dir)
        .args(["detect", "--graph", "Mini", "--graph-dir"])
        .arg(&graphs)
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("CONFORMS"))
        .stdout(predicate::str::contains("unobserved mandatory steps: 2"));
}

#[test]
fn detect_reports_first_deviation_as_json() {
    let dir = TempDir::new().unwrap();
    let graphs = write_mini_graph(&dir);
    let trace = dir.path().join("trace.json");
    std::fs::write(
        &trace,
        r#"{"incident_id": "inc-1", "subject_id": "001010000000001", "events": [
            {"order": 1, "actor": "UE", "action": "Registration Request"},
            {"order": 2, "actor": "AMF", "action": "Registration Reject"}
        ]}"#,
    )
    .unwrap();

    let output = triage(&dir)
        .args(["--json", "detect", "--graph", "Mini", "--graph-dir"])
        .arg(&graphs)
        .arg(&trace)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["subjectId"], "001010000000001");
    assert_eq!(json["result"]["status"], "deviates");
    assert_eq!(json["result"]["deviation_point"], 2);
    assert_eq!(json["result"]["expected_action"], "Authentication Request");
    assert_eq!(json["result"]["actual_action"], "Registration Reject");
}

#[test]
fn detect_unknown_graph_fails() {
    let dir = TempDir::new().unwrap();
    let graphs = write_mini_graph(&dir);
    let trace = dir.path().join("trace.yaml");
    std::fs::write(&trace, "[]\n").unwrap();
    triage(&dir)
        .args(["detect", "--graph", "Nope", "--graph-dir"])
        .arg(&graphs)
        .arg(&trace)
        .assert()
        .failure()
        .stderr(predicate::str::contains("reference graph not found: Nope"));
}
