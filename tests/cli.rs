mod common;

use std::path::Path;

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

use common::TestWorkspace;

fn csv_ingest(database: &Path) -> Command {
    let mut cmd = Command::cargo_bin("csv-ingest").expect("binary exists");
    cmd.env_remove("CSV_INGEST_SCHEMA")
        .env_remove("CSV_INGEST_CONFIG")
        .env_remove("RUST_LOG")
        .env("CSV_INGEST_DATABASE", database);
    cmd
}

fn json_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("json on stdout")
}

fn initialised() -> TestWorkspace {
    let workspace = TestWorkspace::new();
    csv_ingest(&workspace.database())
        .arg("init")
        .assert()
        .success();
    workspace
}

fn ingest(workspace: &TestWorkspace, file: &Path, extra: &[&str]) -> assert_cmd::assert::Assert {
    csv_ingest(&workspace.database())
        .args(["ingest", "-i", file.to_str().unwrap()])
        .args(extra)
        .assert()
}

#[test]
fn ingest_inserts_then_updates_then_reports_no_changes() {
    let workspace = initialised();
    let jobs = workspace.write("jobs.csv", "1,Recruiter\n2,Analyst\n");
    let first = ingest(&workspace, &jobs, &[]).success();
    let outcome = json_stdout(&first.get_output().stdout);
    assert_eq!(outcome["operation"], "insert");
    assert_eq!(outcome["affected_row_count"], 2);
    assert_eq!(outcome["status_code"], 200);

    let renamed = workspace.write("jobs.csv", "1,Recruiter\n2,Data Analyst\n");
    let second = ingest(&workspace, &renamed, &[]).success();
    let outcome = json_stdout(&second.get_output().stdout);
    assert_eq!(outcome["operation"], "update");
    assert_eq!(outcome["affected_row_count"], 1);

    let third = ingest(&workspace, &renamed, &[]).success();
    let outcome = json_stdout(&third.get_output().stdout);
    assert_eq!(outcome["affected_row_count"], 0);
    assert_eq!(outcome["message"], "no changes detected in the provided data");
}

#[test]
fn ingest_of_unknown_file_fails_with_not_found() {
    let workspace = initialised();
    let payroll = workspace.write("payroll.csv", "1,100\n");
    let assert = ingest(&workspace, &payroll, &[])
        .failure()
        .stderr(contains("does not exist"));
    let report = json_stdout(&assert.get_output().stdout);
    assert_eq!(report["status_code"], 404);
    assert_eq!(report["resolved_table_name"], "payroll");
}

#[test]
fn insert_only_rejects_fully_stored_files() {
    let workspace = initialised();
    let departments = workspace.write("departments.csv", "1,Staff\n2,Legal\n");
    ingest(&workspace, &departments, &["--insert-only"]).success();
    let assert = ingest(&workspace, &departments, &["--insert-only"]).failure();
    let outcome = json_stdout(&assert.get_output().stdout);
    assert_eq!(outcome["status_code"], 409);
    assert_eq!(outcome["error"], "duplicate_identity");
}

#[test]
fn catalog_mapping_routes_files_to_tables() {
    let workspace = initialised();
    let db = workspace.database();
    csv_ingest(&db)
        .args(["catalog", "set", "hr_feed", "hired_employees"])
        .assert()
        .success();
    csv_ingest(&db)
        .args(["catalog", "list"])
        .assert()
        .success()
        .stdout(contains("hr_feed"))
        .stdout(contains("hired_employees"));

    let feed = workspace.write(
        "hr_feed.csv",
        "1,Ana,2021-03-01T09:00:00Z,1,1\n2,Bo,2021-08-01T09:00:00Z,1,1\n",
    );
    let assert = ingest(&workspace, &feed, &[]).success();
    assert_eq!(json_stdout(&assert.get_output().stdout)["affected_row_count"], 2);

    csv_ingest(&db)
        .arg("tables")
        .assert()
        .success()
        .stdout(contains("hired_employees"));

    csv_ingest(&db)
        .args(["catalog", "set", "hr_feed", "payroll"])
        .assert()
        .failure()
        .stderr(contains("payroll"));
}

#[test]
fn delete_removes_rows_by_identity() {
    let workspace = initialised();
    let jobs = workspace.write("jobs.csv", "1,Recruiter\n2,Analyst\n3,Lawyer\n");
    ingest(&workspace, &jobs, &[]).success();
    let doomed = workspace.write("jobs.tsv", "2\tAnalyst\n");
    let assert = csv_ingest(&workspace.database())
        .args(["delete", "-i", doomed.to_str().unwrap()])
        .assert()
        .success();
    let outcome = json_stdout(&assert.get_output().stdout);
    assert_eq!(outcome["operation"], "delete");
    assert_eq!(outcome["affected_row_count"], 1);
}

#[test]
fn process_reports_without_writing() {
    let workspace = initialised();
    let jobs = workspace.write("jobs.csv", "id,job\n1,Recruiter\n");
    csv_ingest(&workspace.database())
        .args([
            "process",
            "-i",
            jobs.to_str().unwrap(),
            "--has-headers",
            "--preview",
            "0",
        ])
        .assert()
        .success()
        .stdout(contains("\"resolved_table_name\": \"jobs\""));
    csv_ingest(&workspace.database())
        .args(["report", "above-mean", "--year", "2021", "--format", "json"])
        .assert()
        .success()
        .stdout(contains("[]"));
}

#[test]
fn reports_render_tables_and_json() {
    let workspace = initialised();
    let departments = workspace.write("departments.csv", "1,Staff\n2,Legal\n");
    let jobs = workspace.write("jobs.csv", "1,Recruiter\n");
    let hires = workspace.write(
        "hired_employees.csv",
        "1,Ana,2021-01-10T09:00:00Z,1,1\n2,Bo,2021-04-10T09:00:00Z,1,1\n3,Cy,2021-09-10T09:00:00Z,2,1\n",
    );
    for file in [&departments, &jobs, &hires] {
        ingest(&workspace, file, &[]).success();
    }

    csv_ingest(&workspace.database())
        .args(["report", "quarterly", "--year", "2021"])
        .assert()
        .success()
        .stdout(contains("Recruiter"))
        .stdout(contains("Q4"));

    let assert = csv_ingest(&workspace.database())
        .args(["report", "above-mean", "--year", "2021", "--format", "json"])
        .assert()
        .success();
    let rows = json_stdout(&assert.get_output().stdout);
    assert_eq!(
        rows,
        serde_json::json!([{ "id": 1, "department": "Staff", "hired": 2 }])
    );
}

#[test]
fn verify_flags_missing_tables() {
    let workspace = TestWorkspace::new();
    csv_ingest(&workspace.database())
        .arg("verify")
        .assert()
        .failure()
        .stdout(contains("table 'jobs' is missing"));
    csv_ingest(&workspace.database()).arg("init").assert().success();
    csv_ingest(&workspace.database()).arg("verify").assert().success();
}

#[test]
fn settings_file_supplies_database_and_delimiter() {
    let workspace = TestWorkspace::new();
    let config = workspace.write("ingest.yml", "database: from-config.db\ndelimiter: ';'\n");
    let jobs = workspace.write("jobs.csv", "1;Recruiter\n");
    let mut init = Command::cargo_bin("csv-ingest").expect("binary exists");
    init.env_remove("CSV_INGEST_DATABASE")
        .env_remove("CSV_INGEST_SCHEMA")
        .args(["init", "--config", config.to_str().unwrap()])
        .assert()
        .success();
    assert!(workspace.path().join("from-config.db").exists());

    let mut ingest = Command::cargo_bin("csv-ingest").expect("binary exists");
    let assert = ingest
        .env_remove("CSV_INGEST_DATABASE")
        .env_remove("CSV_INGEST_SCHEMA")
        .args(["ingest", "-i", jobs.to_str().unwrap(), "--config", config.to_str().unwrap()])
        .assert()
        .success();
    assert_eq!(json_stdout(&assert.get_output().stdout)["affected_row_count"], 1);
}

#[test]
fn stdin_input_is_routed_by_file_id() {
    let workspace = initialised();
    let assert = csv_ingest(&workspace.database())
        .args(["ingest", "-i", "-", "--file-id", "jobs"])
        .write_stdin("1,Recruiter\n2,Analyst\n")
        .assert()
        .success();
    let outcome = json_stdout(&assert.get_output().stdout);
    assert_eq!(outcome["operation"], "insert");
    assert_eq!(outcome["affected_row_count"], 2);

    let assert = csv_ingest(&workspace.database())
        .args(["ingest", "-i", "-"])
        .write_stdin("1,Recruiter\n")
        .assert()
        .failure()
        .stderr(contains("--file-id"));
    assert_eq!(json_stdout(&assert.get_output().stdout)["status_code"], 400);
}

#[test]
fn empty_file_with_headers_reports_no_changes() {
    let workspace = initialised();
    let jobs = workspace.write("jobs.csv", "");
    let assert = ingest(&workspace, &jobs, &["--has-headers"]).success();
    let outcome = json_stdout(&assert.get_output().stdout);
    assert_eq!(outcome["status_code"], 200);
    assert_eq!(outcome["affected_row_count"], 0);
    assert_eq!(outcome["message"], "no changes detected in the provided data");
}
