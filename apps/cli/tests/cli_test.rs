//! Integration tests for the `autopilot` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Runs `autopilot` inside `dir` with HOME pointed there too, so no user
/// configuration leaks into the test.
fn autopilot(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("autopilot").unwrap();
    cmd.current_dir(dir.path()).env("HOME", dir.path()).env_remove("RUST_LOG");
    cmd
}

fn write_tasks(dir: &TempDir) {
    let tasks = r#"[
        {"id": "footer", "description": "Extract Footer component", "priority": 10, "tags": ["ui"]},
        {"id": "rate-limit", "description": "Add API rate limiting", "priority": 90, "tags": ["backend"]},
        {"id": "docs", "description": "Document the deployment pipeline", "priority": 50, "agent": "learning-curator"}
    ]"#;
    fs::write(dir.path().join("tasks.json"), tasks).unwrap();
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    autopilot(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("agents"));
}

#[test]
fn test_validate_default_config() {
    let dir = TempDir::new().unwrap();
    autopilot(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration valid"))
        .stdout(predicate::str::contains("All checks passed"));
}

#[test]
fn test_validate_rejects_bad_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("autopilot.toml"), "[learning]\nsmoothing_factor = 1.5\n").unwrap();

    autopilot(&dir).arg("validate").assert().failure();
}

#[test]
fn test_submit_then_duplicate_fails() {
    let dir = TempDir::new().unwrap();

    autopilot(&dir)
        .args(["submit", "--id", "header", "--description", "Extract Header component", "--priority", "95"])
        .assert()
        .success()
        .stdout(predicate::str::contains("accepted"));

    assert!(dir.path().join(".autopilot/state.json").exists());

    autopilot(&dir)
        .args(["submit", "--id", "header", "--description", "Again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("header"));
}

#[test]
fn test_status_without_run() {
    let dir = TempDir::new().unwrap();
    autopilot(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No status recorded yet"));
}

#[test]
fn test_run_until_idle_exports_status() {
    let dir = TempDir::new().unwrap();
    write_tasks(&dir);

    autopilot(&dir)
        .args(["run", "--tasks", "tasks.json", "--until-idle", "--simulate-ms", "5", "--duration", "30"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pre-loaded 3 task(s)"))
        .stdout(predicate::str::contains("Run summary"));

    assert!(dir.path().join(".autopilot/status.json").exists());
    assert!(dir.path().join(".autopilot/executions.log").exists());

    let output = autopilot(&dir).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["state"], "stopped");
    assert_eq!(status["total_executions"], 3);
    assert_eq!(status["queue"]["completed"], 3);

    let order: Vec<&str> = status["recent_results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["task_id"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["rate-limit", "docs", "footer"]);
}

#[test]
fn test_submitted_task_runs_on_next_run() {
    let dir = TempDir::new().unwrap();

    autopilot(&dir)
        .args(["submit", "--id", "nav", "--description", "Build navigation menu", "--tag", "ui"])
        .assert()
        .success();

    autopilot(&dir)
        .args(["run", "--until-idle", "--simulate-ms", "5", "--duration", "30"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored checkpoint"));

    let output = autopilot(&dir).args(["status", "--json"]).output().unwrap();
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["recent_results"][0]["task_id"], "nav");
    assert_eq!(status["recent_results"][0]["agent"], "reiki-frontend-strategist");
}

#[test]
fn test_agents_lists_roster_and_learned_scores() {
    let dir = TempDir::new().unwrap();

    autopilot(&dir)
        .arg("agents")
        .assert()
        .success()
        .stdout(predicate::str::contains("reiki-frontend-strategist"));

    write_tasks(&dir);
    autopilot(&dir)
        .args(["run", "--tasks", "tasks.json", "--until-idle", "--simulate-ms", "5", "--duration", "30"])
        .assert()
        .success();

    let output = autopilot(&dir).args(["agents", "--json"]).output().unwrap();
    let agents: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let curator = agents
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["name"] == "learning-curator")
        .unwrap();
    assert_eq!(curator["executions"], 1);
}
