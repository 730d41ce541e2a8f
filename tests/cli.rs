use assert_cmd::Command;
use assert_cmd::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A `hoist` command isolated in a temp HOME so `~/.hoist/` never leaks
/// between tests.
fn hoist_cmd(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("hoist");
    cmd.current_dir(home.path());
    cmd.env("HOME", home.path());
    cmd.env_remove("HOIST_DB");
    cmd.env_remove("HOIST_ACCESS_ID");
    cmd.env_remove("HOIST_SECRET_KEY");
    cmd.env("HOIST_ACTOR", "integration");
    cmd.env("NO_COLOR", "1");
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout is JSON")
}

fn write_users(bucket: &Path, org: &str, app: &str) {
    let dir = bucket.join(org);
    fs::create_dir_all(&dir).unwrap();
    let alice = "4f7c8a1e-0000-4000-8000-000000000001";
    let bob = "4f7c8a1e-0000-4000-8000-000000000002";
    let body = format!(
        r#"[
  {{"Metadata": {{"uuid": "{alice}", "type": "user", "name": "alice"}},
    "connections": {{"follows": ["{bob}"]}}}},
  {{"Metadata": {{"uuid": "{bob}", "type": "user", "name": "bob"}},
    "dictionaries": {{"prefs": {{"theme": "dark"}}}}}}
]"#
    );
    fs::write(dir.join(format!("{app}.users.1.json")), body).unwrap();
}

// ============================================================================
// Basics
// ============================================================================

#[test]
fn version_prints_name() {
    let home = TempDir::new().unwrap();
    hoist_cmd(&home)
        .args(["version", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\":\"hoist-cli\""));
}

#[test]
fn verbose_quiet_conflict() {
    let home = TempDir::new().unwrap();
    hoist_cmd(&home)
        .args(["--verbose", "--quiet", "org", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn commands_require_init() {
    let home = TempDir::new().unwrap();
    hoist_cmd(&home)
        .args(["org", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("NOT_INITIALIZED"));
}

#[test]
fn init_creates_database_and_config() {
    let home = TempDir::new().unwrap();
    hoist_cmd(&home).arg("init").assert().success();

    assert!(home.path().join(".hoist/data/hoist.db").exists());
    assert!(home.path().join(".hoist/config.json").exists());

    hoist_cmd(&home).arg("init").assert().code(2);
    hoist_cmd(&home).args(["init", "--force"]).assert().success();
}

#[test]
fn collection_without_app_is_rejected() {
    let home = TempDir::new().unwrap();
    hoist_cmd(&home)
        .args([
            "import", "schedule", "--org", "4f7c8a1e-0000-4000-8000-00000000000a",
            "--collection", "users", "--provider", "local", "--bucket", ".",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--app"));
}

// ============================================================================
// Import flow
// ============================================================================

#[test]
fn status_of_unknown_jobs_uses_sentinels() {
    let home = TempDir::new().unwrap();
    hoist_cmd(&home).arg("init").assert().success();

    let status = json_stdout(hoist_cmd(&home).args(["import", "status"]));
    assert_eq!(status["state"], "UUID passed in cannot be null");

    let status = json_stdout(hoist_cmd(&home).args(["import", "status", "not-a-job"]));
    assert_eq!(status["state"], "No Such Element found");
    assert!(status.get("files").is_none());
}

#[test]
fn golden_path_import() {
    let home = TempDir::new().unwrap();
    let bucket = home.path().join("bucket");
    hoist_cmd(&home).arg("init").assert().success();

    let org = json_stdout(hoist_cmd(&home).args(["org", "create", "acme"]));
    let org_id = org["id"].as_str().unwrap().to_string();
    let app = json_stdout(hoist_cmd(&home).args(["app", "create", "--org", &org_id, "shop"]));
    let app_id = app["id"].as_str().unwrap().to_string();

    write_users(&bucket, "acme", "shop");

    let job = json_stdout(hoist_cmd(&home).args([
        "import", "schedule", "--org", &org_id, "--app", &app_id, "--collection", "users",
        "--provider", "local", "--bucket", bucket.to_str().unwrap(),
    ]));
    assert_eq!(job["state"], "SCHEDULED");
    let job_id = job["id"].as_str().unwrap().to_string();

    let stats = json_stdout(hoist_cmd(&home).args(["import", "run"]));
    assert_eq!(stats["completed"], 2);
    assert_eq!(stats["dead"], 0);

    let status = json_stdout(hoist_cmd(&home).args(["import", "status", &job_id]));
    assert_eq!(status["state"], "FINISHED");
    assert_eq!(status["files"]["total"], 1);
    assert_eq!(status["files"]["finished"], 1);

    let files = json_stdout(hoist_cmd(&home).args(["import", "files", &job_id]));
    assert_eq!(files["count"], 1);
    let task = &files["files"][0];
    assert_eq!(task["file_name"], "acme/shop.users.1.json");
    assert_eq!(task["entities_imported"], 2);
    assert_eq!(task["connections_imported"], 1);

    let task_id = task["id"].as_str().unwrap().to_string();
    let errors = json_stdout(hoist_cmd(&home).args(["import", "errors", &task_id]));
    assert_eq!(errors["count"], 0);

    let jobs = json_stdout(hoist_cmd(&home).args(["import", "list"]));
    assert_eq!(jobs["count"], 1);

    let history = json_stdout(hoist_cmd(&home).args(["import", "history", &job_id]));
    let events = history["events"].as_array().unwrap();
    assert_eq!(events[0]["event"], "job_created");
    let last = events.last().unwrap();
    assert_eq!(last["event"], "job_state_changed");
    assert_eq!(last["from"], "STARTED");
    assert_eq!(last["to"], "FINISHED");
    assert_eq!(last["actor"], "integration");
}

#[test]
fn empty_bucket_finishes_without_files() {
    let home = TempDir::new().unwrap();
    let bucket = home.path().join("empty");
    fs::create_dir_all(&bucket).unwrap();
    hoist_cmd(&home).arg("init").assert().success();

    let org = json_stdout(hoist_cmd(&home).args(["org", "create", "acme"]));
    let org_id = org["id"].as_str().unwrap().to_string();
    let app = json_stdout(hoist_cmd(&home).args(["app", "create", "--org", &org_id, "shop"]));
    let app_id = app["id"].as_str().unwrap().to_string();

    let job_id = hoist_cmd(&home)
        .args([
            "--silent", "import", "schedule", "--org", &org_id, "--app", &app_id,
            "--collection", "users", "--provider", "local", "--bucket",
            bucket.to_str().unwrap(),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let job_id = String::from_utf8(job_id).unwrap().trim().to_string();

    hoist_cmd(&home).args(["import", "run"]).assert().success();

    let status = json_stdout(hoist_cmd(&home).args(["import", "status", &job_id]));
    assert_eq!(status["state"], "FINISHED");
    assert!(
        status["error_message"]
            .as_str()
            .unwrap()
            .starts_with("No files found in the bucket")
    );
}

#[test]
fn application_scope_fails_the_job() {
    let home = TempDir::new().unwrap();
    hoist_cmd(&home).arg("init").assert().success();

    let org = json_stdout(hoist_cmd(&home).args(["org", "create", "acme"]));
    let org_id = org["id"].as_str().unwrap().to_string();
    let app = json_stdout(hoist_cmd(&home).args(["app", "create", "--org", &org_id, "shop"]));
    let app_id = app["id"].as_str().unwrap().to_string();

    let job = json_stdout(hoist_cmd(&home).args([
        "import", "schedule", "--org", &org_id, "--app", &app_id, "--provider", "local",
        "--bucket", ".",
    ]));
    let job_id = job["id"].as_str().unwrap().to_string();
    hoist_cmd(&home).args(["import", "run"]).assert().success();

    let status = json_stdout(hoist_cmd(&home).args(["import", "status", &job_id]));
    assert_eq!(status["state"], "FAILED");
    assert_eq!(status["error_message"], "Import applications not supported");
}

#[test]
fn export_writes_importable_file() {
    let home = TempDir::new().unwrap();
    let bucket = home.path().join("bucket");
    let out = home.path().join("out");
    fs::create_dir_all(&out).unwrap();
    hoist_cmd(&home).arg("init").assert().success();

    let org = json_stdout(hoist_cmd(&home).args(["org", "create", "acme"]));
    let org_id = org["id"].as_str().unwrap().to_string();
    let app = json_stdout(hoist_cmd(&home).args(["app", "create", "--org", &org_id, "shop"]));
    let app_id = app["id"].as_str().unwrap().to_string();
    write_users(&bucket, "acme", "shop");

    hoist_cmd(&home)
        .args([
            "import", "schedule", "--org", &org_id, "--app", &app_id, "--collection", "users",
            "--provider", "local", "--bucket", bucket.to_str().unwrap(),
        ])
        .assert()
        .success();
    hoist_cmd(&home).args(["import", "run"]).assert().success();

    let summary = json_stdout(hoist_cmd(&home).args([
        "export", "--org", &org_id, "--app", &app_id, "--collection", "users",
        "--provider", "local", "--bucket", out.to_str().unwrap(),
    ]));
    assert_eq!(summary["entities"], 2);
    let blob_name = summary["blob_name"].as_str().unwrap();
    assert!(blob_name.starts_with("acme/shop.users."));

    let exported: Value =
        serde_json::from_str(&fs::read_to_string(out.join(blob_name)).unwrap()).unwrap();
    assert_eq!(exported.as_array().unwrap().len(), 2);
}
