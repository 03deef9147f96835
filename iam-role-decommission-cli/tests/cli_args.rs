use std::process::Command;

use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_iam-role-decommission");

const CONTROL_ROLE_ARN: &str = "arn:aws:iam::038462757316:role/control-role";

/// Every variable the CLI reads, cleared so the host environment cannot leak in.
const ENV_VARS: [&str; 11] = [
    "CONTROL_ROLE_ARN",
    "DELEGATION_ROLE",
    "BACKUP_BUCKET",
    "WORKSPACE",
    "THRESHOLD_DAYS",
    "AWS_REGION",
    "BUILD_NUMBER",
    "ACCOUNTS_FILE",
    "TARGET_ACCOUNT",
    "TARGET_ROLE",
    "TASK",
];

/// `subcommand` with the shared pipeline flags filled in.
fn command(subcommand: &str, workspace: &TempDir) -> AssertCommand {
    let mut cmd = AssertCommand::new(BIN);
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.args([
        subcommand,
        "--control-role-arn",
        CONTROL_ROLE_ARN,
        "--delegation-role",
        "delegate",
        "--bucket",
        "role-backups",
        "--workspace",
    ])
    .arg(workspace.path());
    cmd
}

#[test]
fn help_lists_subcommands() {
    let out = Command::new(BIN)
        .arg("--help")
        .output()
        .expect("failed to run --help");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(s.contains("run"), "help should list run: {s}");
    assert!(s.contains("inspect"), "help should list inspect: {s}");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn run_help_documents_task_values() {
    AssertCommand::new(BIN)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--task"))
        .stdout(predicate::str::contains("backup"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn malformed_accounts_file_is_fatal() {
    let workspace = TempDir::new().expect("tempdir");
    let accounts = workspace.path().join("accounts.txt");
    std::fs::write(&accounts, "111122223333,legacy-worker\n12345,old-lambda\n").expect("write");

    command("run", &workspace)
        .arg("--accounts-file")
        .arg(&accounts)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn empty_accounts_file_is_fatal() {
    let workspace = TempDir::new().expect("tempdir");
    let accounts = workspace.path().join("accounts.txt");
    std::fs::write(&accounts, "# nothing to do\n\n").expect("write");

    command("run", &workspace)
        .arg("--accounts-file")
        .arg(&accounts)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no account/role entries"));
}

#[test]
fn missing_accounts_file_is_fatal() {
    let workspace = TempDir::new().expect("tempdir");

    command("run", &workspace)
        .arg("--accounts-file")
        .arg(workspace.path().join("absent.txt"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to read input file"));
}

#[test]
fn invalid_single_account_is_fatal() {
    let workspace = TempDir::new().expect("tempdir");

    command("run", &workspace)
        .args(["--account", "12345", "--role", "legacy-worker"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("12 digits"));
}

#[test]
fn account_without_role_is_rejected() {
    let workspace = TempDir::new().expect("tempdir");

    command("run", &workspace)
        .args(["--account", "111122223333"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--role"));
}

#[test]
fn non_role_control_arn_is_fatal() {
    let workspace = TempDir::new().expect("tempdir");
    let mut cmd = AssertCommand::new(BIN);
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.args([
        "run",
        "--control-role-arn",
        "arn:aws:iam::038462757316:user/someone",
        "--delegation-role",
        "delegate",
        "--bucket",
        "role-backups",
        "--account",
        "111122223333",
        "--role",
        "legacy-worker",
        "--workspace",
    ])
    .arg(workspace.path())
    .assert()
    .code(2)
    .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn invalid_inspect_target_is_fatal() {
    let workspace = TempDir::new().expect("tempdir");
    command("inspect", &workspace)
        .args(["--account", "not-an-account", "--role", "legacy-worker"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid target"));
}
