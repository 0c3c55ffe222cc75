//! CLI integration tests for fleet
//!
//! These tests drive the binary through whole workflows: defining a fleet,
//! planning it, rejecting invalid edits, and moving it between files.

use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Get a command instance for the fleet binary
fn fleet_cmd() -> assert_cmd::Command {
    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("fleet"))
}

/// Create a temporary directory and initialize a fleet project
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fleet_cmd().arg("init").arg(dir.path()).assert().success();
    dir
}

fn run_in(dir: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    fleet_cmd().current_dir(dir).args(args).assert()
}

fn json_in(dir: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["--format", "json"];
    full.extend_from_slice(args);
    let out = fleet_cmd().current_dir(dir).args(&full).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

/// db <- api inside a `backend` group
fn setup_backend() -> TempDir {
    let dir = setup_project();
    run_in(dir.path(), &["group", "add", "Backend", "--id", "backend"]).success();
    run_in(
        dir.path(),
        &["service", "add", "Postgres", "--group", "backend", "--path", "/bin/true", "--id", "db"],
    )
    .success();
    run_in(
        dir.path(),
        &[
            "service", "add", "API", "--group", "backend", "--path", "/bin/true", "--id", "api",
            "--depends-on", "db",
        ],
    )
    .success();
    dir
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_init_creates_structure() {
    let dir = TempDir::new().unwrap();

    fleet_cmd()
        .arg("init")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized fleet project"));

    assert!(dir.path().join(".fleet").is_dir());
    assert!(dir.path().join(".fleet/run").is_dir());
    assert!(dir.path().join(".fleet/fleet.json").is_file());
    assert!(dir.path().join(".fleet/config.toml").is_file());
    assert!(dir.path().join(".fleet/.gitignore").is_file());
}

#[test]
fn test_init_is_idempotent() {
    let dir = setup_project();
    run_in(dir.path(), &["group", "add", "Backend", "--id", "backend"]).success();

    fleet_cmd().arg("init").arg(dir.path()).assert().success();

    run_in(dir.path(), &["group", "list"])
        .success()
        .stdout(predicate::str::contains("backend"));
}

#[test]
fn test_commands_outside_project_fail() {
    let dir = TempDir::new().unwrap();

    run_in(dir.path(), &["status"])
        .failure()
        .stderr(predicate::str::contains("fleet init"));
}

// =============================================================================
// Definition Tests
// =============================================================================

#[test]
fn test_service_add_and_show() {
    let dir = setup_backend();

    run_in(dir.path(), &["service", "list"])
        .success()
        .stdout(predicate::str::contains("db"))
        .stdout(predicate::str::contains("api"));

    let api = json_in(dir.path(), &["service", "show", "api"]);
    assert_eq!(api["groupId"], "backend");
    assert_eq!(api["dependencyConfigs"][0]["serviceId"], "db");
    assert_eq!(api["dependencyConfigs"][0]["type"], "required");
}

#[test]
fn test_service_add_generates_id() {
    let dir = setup_backend();

    run_in(
        dir.path(),
        &["service", "add", "Cache", "--group", "backend", "--path", "/bin/true"],
    )
    .success()
    .stdout(predicate::str::contains("Created service: svc-"));
}

#[test]
fn test_service_in_unknown_group_rejected() {
    let dir = setup_project();

    run_in(
        dir.path(),
        &["service", "add", "Orphan", "--group", "nowhere", "--path", "/bin/true"],
    )
    .failure()
    .stderr(predicate::str::contains("Rejected"));
}

#[test]
fn test_duplicate_service_rejected() {
    let dir = setup_backend();

    run_in(
        dir.path(),
        &["service", "add", "Again", "--group", "backend", "--path", "/bin/true", "--id", "db"],
    )
    .failure()
    .stdout(predicate::str::contains("db"));
}

#[test]
fn test_service_update_moves_group() {
    let dir = setup_backend();
    run_in(dir.path(), &["group", "add", "Data", "--id", "data"]).success();

    run_in(dir.path(), &["service", "update", "db", "--group", "data", "--port", "5432"]).success();

    let db = json_in(dir.path(), &["service", "show", "db"]);
    assert_eq!(db["groupId"], "data");
    assert_eq!(db["port"], 5432);
}

// =============================================================================
// Validation and Planning Tests
// =============================================================================

#[test]
fn test_plan_orders_dependency_first() {
    let dir = setup_backend();

    run_in(dir.path(), &["plan", "--group", "backend"])
        .success()
        .stdout(predicate::str::contains("batch 1: db (Postgres)"))
        .stdout(predicate::str::contains("batch 2: api (API)"));

    let plan = json_in(dir.path(), &["plan", "--group", "backend", "--shutdown"]);
    assert_eq!(plan["order"], serde_json::json!(["api", "db"]));
}

#[test]
fn test_plan_groups_by_order() {
    let dir = setup_project();
    run_in(dir.path(), &["group", "add", "One", "--id", "g1", "--order", "2"]).success();
    run_in(dir.path(), &["group", "add", "Two", "--id", "g2", "--order", "1"]).success();

    let plan = json_in(dir.path(), &["plan"]);
    assert_eq!(plan["order"], serde_json::json!(["g2", "g1"]));
}

#[test]
fn test_deleting_dependency_rejected() {
    let dir = setup_backend();

    run_in(dir.path(), &["service", "remove", "db"])
        .failure()
        .stdout(predicate::str::contains("db"))
        .stderr(predicate::str::contains("Rejected delete service db"));

    run_in(dir.path(), &["service", "list"])
        .success()
        .stdout(predicate::str::contains("Postgres"));
}

#[test]
fn test_group_cycle_rejected() {
    let dir = setup_project();
    run_in(dir.path(), &["group", "add", "A", "--id", "a"]).success();
    run_in(dir.path(), &["group", "add", "B", "--id", "b", "--depends-on", "a"]).success();

    run_in(dir.path(), &["dep", "add", "a", "b", "--group"])
        .failure()
        .stdout(predicate::str::contains("Circular group dependencies detected"));

    let groups = json_in(dir.path(), &["group", "list"]);
    assert_eq!(groups[0]["dependencies"], serde_json::json!([]));
}

#[test]
fn test_optional_dependency_does_not_order() {
    let dir = setup_backend();
    run_in(
        dir.path(),
        &["service", "add", "Worker", "--group", "backend", "--path", "/bin/true", "--id", "worker"],
    )
    .success();

    run_in(dir.path(), &["dep", "add", "db", "worker", "--type", "optional"]).success();

    let plan = json_in(dir.path(), &["plan", "--group", "backend"]);
    assert_eq!(plan["order"], serde_json::json!(["db", "worker", "api"]));
}

#[test]
fn test_validate_reports_warnings() {
    let dir = setup_backend();
    run_in(dir.path(), &["service", "update", "db", "--auto-start", "true"]).success();

    run_in(dir.path(), &["validate"])
        .success()
        .stdout(predicate::str::contains("warning"))
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_validate_file_with_cycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.yaml");
    fs::write(
        &path,
        r#"
groups:
  - id: a
    name: Alpha
    dependencies: [b]
  - id: b
    name: Beta
    dependencies: [a]
"#,
    )
    .unwrap();

    fleet_cmd()
        .current_dir(dir.path())
        .args(["validate"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Alpha"))
        .stdout(predicate::str::contains("Beta"));
}

// =============================================================================
// Application Tests
// =============================================================================

#[test]
fn test_application_attach_and_cascade() {
    let dir = setup_backend();
    run_in(dir.path(), &["app", "add", "Shop", "--id", "shop"]).success();
    run_in(dir.path(), &["app", "attach", "shop", "backend"]).success();

    let apps = json_in(dir.path(), &["app", "list"]);
    assert_eq!(apps[0]["groupIds"], serde_json::json!(["backend"]));

    run_in(dir.path(), &["plan", "--application", "shop"])
        .success()
        .stdout(predicate::str::contains("backend"));

    run_in(dir.path(), &["app", "remove", "shop", "--cascade"]).success();
    let groups = json_in(dir.path(), &["group", "list"]);
    assert_eq!(groups, serde_json::json!([]));
}

#[test]
fn test_group_remove_requires_cascade() {
    let dir = setup_backend();

    run_in(dir.path(), &["group", "remove", "backend"]).failure();
    run_in(dir.path(), &["group", "remove", "backend", "--cascade"]).success();

    run_in(dir.path(), &["service", "list"])
        .success()
        .stdout(predicate::str::contains("No services found"));
}

// =============================================================================
// Exchange Tests
// =============================================================================

#[test]
fn test_export_import_yaml() {
    let source = setup_backend();
    let dest = setup_project();
    let file = source.path().join("fleet.yaml");

    fleet_cmd()
        .current_dir(source.path())
        .arg("export")
        .arg(&file)
        .assert()
        .success();
    assert!(fs::read_to_string(&file).unwrap().contains("dependencyConfigs"));

    fleet_cmd()
        .current_dir(dest.path())
        .arg("import")
        .arg(&file)
        .assert()
        .success();

    run_in(dest.path(), &["plan", "--group", "backend"])
        .success()
        .stdout(predicate::str::contains("batch 1: db"));
}

#[test]
fn test_import_invalid_keeps_fleet() {
    let dir = setup_backend();
    let file = dir.path().join("broken.json");
    fs::write(
        &file,
        r#"{"groups":[{"id":"g","name":"G","services":[
            {"id":"a","name":"A","path":"/bin/a","dependencies":["b"]},
            {"id":"b","name":"B","path":"/bin/b","dependencies":["a"]}
        ]}]}"#,
    )
    .unwrap();

    fleet_cmd()
        .current_dir(dir.path())
        .arg("import")
        .arg(&file)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Circular dependencies detected"));

    run_in(dir.path(), &["service", "list"])
        .success()
        .stdout(predicate::str::contains("Postgres"));
}

#[test]
fn test_export_to_stdout_is_declarative() {
    let dir = setup_backend();

    run_in(dir.path(), &["export", "-", "--as", "json"])
        .success()
        .stdout(predicate::str::contains("\"id\": \"db\""))
        .stdout(predicate::str::contains("\"pid\"").not());
}

// =============================================================================
// Status Tests
// =============================================================================

#[test]
fn test_status_lists_stopped_services() {
    let dir = setup_backend();

    run_in(dir.path(), &["status"])
        .success()
        .stdout(predicate::str::contains("stopped"))
        .stdout(predicate::str::contains("backend"));
}

#[test]
fn test_status_json_is_fresh() {
    let dir = setup_backend();

    let status = json_in(dir.path(), &["status"]);
    assert_eq!(status["stale"], false);
    assert_eq!(status["services"].as_array().unwrap().len(), 2);
    assert_eq!(status["services"][0]["status"], "stopped");
}

#[test]
fn test_status_empty_fleet() {
    let dir = setup_project();

    run_in(dir.path(), &["status"])
        .success()
        .stdout(predicate::str::contains("No services defined"));
}
