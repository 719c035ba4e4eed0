#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

const CONTAINERS_ONLY: &str = r#"
project "checkout"

image "worker" {
    target "acme/checkout-worker"
}

service "cache" kind="container" {
    image "redis:7"
    port host=16379 container=6379
    ready container=#true interval=1 deadline=30
}

service "worker" kind="container" tier=1 {
    image "worker"
    port host=18081 container=8080
}
"#;

fn testbed(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("testbed").unwrap();
    cmd.current_dir(dir)
        .env_remove("TESTBED_FILE")
        .env_remove("TESTBED_REGISTRY")
        .env_remove("TESTBED_TAG")
        .env("XDG_CONFIG_HOME", dir.join("config"));
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    testbed(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("down"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    testbed(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("testbed"));
}

#[test]
fn test_validate_valid_definition() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("testbed.kdl"), CONTAINERS_ONLY).unwrap();

    testbed(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"))
        .stdout(predicate::str::contains("checkout"));
}

#[test]
fn test_validate_reports_every_problem() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("testbed.kdl"),
        r#"
        service "a" kind="container" { port host=8080 container=80; }
        service "b" kind="container" {
            image "nginx"
            port host=8080 container=80
        }
        "#,
    )
    .unwrap();

    testbed(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs an image"))
        .stderr(predicate::str::contains("host port 8080"));
}

#[test]
fn test_validate_outside_a_project_fails() {
    let dir = tempfile::tempdir().unwrap();
    testbed(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("testbed.kdl"));
}

#[test]
fn test_validate_with_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("ci")).unwrap();
    std::fs::write(dir.path().join("ci").join("env.kdl"), CONTAINERS_ONLY).unwrap();

    testbed(dir.path())
        .args(["--file", "ci/env.kdl", "validate"])
        .assert()
        .success();
}

#[test]
fn test_plan_lists_tasks_without_running_them() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("testbed.kdl"), CONTAINERS_ONLY).unwrap();

    testbed(dir.path())
        .args(["plan", "--run-id", "ci-7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ci-7"))
        .stdout(predicate::str::contains("image:worker"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("deploy:cache"))
        .stdout(predicate::str::contains("ready:cache"))
        .stdout(predicate::str::contains("deploy:worker"));
}

#[test]
fn test_plan_and_down_work_without_a_docker_daemon() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("testbed.kdl"), CONTAINERS_ONLY).unwrap();
    let socket = format!("unix://{}", dir.path().join("missing.sock").display());

    testbed(dir.path())
        .env("DOCKER_HOST", &socket)
        .args(["plan", "--run-id", "ci-8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy:cache"));

    // Nothing was recorded, so down fails on the record, not on the daemon
    testbed(dir.path())
        .env("DOCKER_HOST", &socket)
        .arg("down")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no records"))
        .stderr(predicate::str::contains("Docker").not());
}

#[test]
fn test_run_requires_a_command() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("testbed.kdl"), CONTAINERS_ONLY).unwrap();

    testbed(dir.path()).arg("run").assert().failure();
}

#[test]
fn test_invalid_command() {
    let dir = tempfile::tempdir().unwrap();
    testbed(dir.path()).arg("invalid-command").assert().failure();
}
