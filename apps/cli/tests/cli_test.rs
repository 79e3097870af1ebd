//! Integration tests for the `ensemble` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A command isolated from the user's configuration files and credentials.
fn ensemble(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ensemble").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env_remove("RUST_LOG")
        .env_remove("WATSONX_APIKEY")
        .env_remove("SERPER_API_KEY");
    cmd
}

#[test]
fn test_no_command_prints_help() {
    let temp_dir = TempDir::new().unwrap();
    ensemble(&temp_dir).assert().success().stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_init_writes_builtin_crew() {
    let temp_dir = TempDir::new().unwrap();

    ensemble(&temp_dir)
        .args(["init", "crews/keynote.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Crew definition written"));

    let content = std::fs::read_to_string(temp_dir.path().join("crews/keynote.toml")).unwrap();
    assert!(content.contains("meta-llama/llama-3-70b-instruct"));
    assert!(content.contains("Senior Speech Writer"));
}

#[test]
fn test_init_refuses_to_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("crew.toml");
    std::fs::write(&path, "# mine").unwrap();

    ensemble(&temp_dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine");

    ensemble(&temp_dir).args(["init", "--force"]).assert().success();
    assert!(std::fs::read_to_string(&path).unwrap().contains("[[agents]]"));
}

#[test]
fn test_show_builtin_crew() {
    let temp_dir = TempDir::new().unwrap();

    ensemble(&temp_dir)
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("quantum-keynote"))
        .stdout(predicate::str::contains("Senior AI Researcher"))
        .stdout(predicate::str::contains("ibm/granite-13b-instruct-v2"))
        .stdout(predicate::str::contains("task2output.txt"));
}

#[test]
fn test_show_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();

    ensemble(&temp_dir)
        .args(["show", "missing.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load crew file"));
}

#[test]
fn test_show_rejects_invalid_crew() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("bad.toml"), "[crew]\nname = \"bad\"\n").unwrap();

    ensemble(&temp_dir).args(["show", "bad.toml"]).assert().failure();
}

#[test]
fn test_run_mock_writes_task_outputs() {
    let temp_dir = TempDir::new().unwrap();

    ensemble(&temp_dir)
        .args(["run", "--mock", "--output-dir", "out"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Final output:"))
        .stdout(predicate::str::contains("Write an engaging keynote speech on quantum computing."));

    let task1 = std::fs::read_to_string(temp_dir.path().join("out/task1output.txt")).unwrap();
    let task2 = std::fs::read_to_string(temp_dir.path().join("out/task2output.txt")).unwrap();
    assert!(task1.contains("Search the internet and find 5 examples of promising AI research."));
    assert!(task2.contains("Write an engaging keynote speech on quantum computing."));
}

#[test]
fn test_run_mock_json_output() {
    let temp_dir = TempDir::new().unwrap();

    let output = ensemble(&temp_dir)
        .args(["run", "--mock", "--json", "--output-dir", "out"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let tasks = value["tasks_output"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["agent_role"], "Senior AI Researcher");
    assert_eq!(tasks[1]["agent_role"], "Senior Speech Writer");
    assert_eq!(value["raw"], tasks[1]["raw"]);
}

#[test]
fn test_run_uses_local_config() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(".ensemblerc"), "output_dir = \"from-config\"\nlog_level = \"warn\"\n")
        .unwrap();

    ensemble(&temp_dir).args(["run", "--mock"]).assert().success();

    assert!(temp_dir.path().join("from-config/task1output.txt").exists());
    assert!(temp_dir.path().join("from-config/task2output.txt").exists());
}

#[test]
fn test_run_without_credentials_fails() {
    let temp_dir = TempDir::new().unwrap();

    ensemble(&temp_dir)
        .args(["run", "--output-dir", "out"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("WATSONX_APIKEY"));

    assert!(!temp_dir.path().join("out/task1output.txt").exists());
}

#[test]
fn test_unknown_log_level_is_rejected() {
    let temp_dir = TempDir::new().unwrap();

    ensemble(&temp_dir)
        .args(["--log-level", "garbag", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level 'garbag'"));

    ensemble(&temp_dir).args(["--log-level", "DEBUG", "show"]).assert().success();
}
