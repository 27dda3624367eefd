use assert_cmd::prelude::*; // Add methods on commands
use assert_fs::prelude::*;
use predicates::prelude::*; // Used for writing assertions
use std::process::Command;

/// Binary with an isolated home directory and plain output
fn probe(home: &assert_fs::TempDir) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("greatsql-probe")?;
    cmd.env("HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn cannot_run_check_without_operation() -> Result<(), Box<dyn std::error::Error>> {
    let home = assert_fs::TempDir::new()?;
    let mut cmd = probe(&home)?;

    cmd.arg("check");
    cmd.assert().failure().stderr(predicate::str::contains(
        "the following required arguments were not provided:",
    ));

    Ok(())
}

#[test]
fn lists_operations_and_creates_config() -> Result<(), Box<dyn std::error::Error>> {
    let home = assert_fs::TempDir::new()?;
    let mut cmd = probe(&home)?;

    cmd.arg("operations");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("trackNotableStats"))
        .stdout(predicate::str::contains("avgSQLRT"))
        .stdout(predicate::str::contains("8 operations available"));

    home.child(".greatsql-probe/config.toml")
        .assert(predicate::path::exists());

    Ok(())
}

#[test]
fn lists_operations_as_json() -> Result<(), Box<dyn std::error::Error>> {
    let home = assert_fs::TempDir::new()?;
    let output = probe(&home)?.args(["operations", "--json"]).output()?;

    assert!(output.status.success());
    let catalogue: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let catalogue = catalogue.as_array().ok_or("expected a JSON array")?;
    assert_eq!(catalogue.len(), 8);
    assert_eq!(catalogue[0]["name"], "trackNotableStats");
    assert_eq!(catalogue[7]["inSweep"], false);

    Ok(())
}

#[test]
fn rejects_unknown_operation() -> Result<(), Box<dyn std::error::Error>> {
    let home = assert_fs::TempDir::new()?;
    let mut cmd = probe(&home)?;

    cmd.args(["check", "insertData"]);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Unknown operation: insertData"));

    Ok(())
}

#[test]
fn rejects_unknown_severity() -> Result<(), Box<dyn std::error::Error>> {
    let home = assert_fs::TempDir::new()?;
    let mut cmd = probe(&home)?;

    cmd.args(["sweep", "--severity", "loud"]);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("severity must be one of"));

    Ok(())
}

#[test]
fn reports_unreachable_server() -> Result<(), Box<dyn std::error::Error>> {
    let home = assert_fs::TempDir::new()?;
    let mut cmd = probe(&home)?;

    cmd.args(["check", "checkMGRStatus", "--url", "mysql://root@127.0.0.1:1"]);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("checkMGRStatus failed"));

    Ok(())
}

#[test]
fn invalid_environment_setting_fails_init() -> Result<(), Box<dyn std::error::Error>> {
    let home = assert_fs::TempDir::new()?;
    let mut cmd = probe(&home)?;

    cmd.env("PROBE_MYSQL__PORT", "not-a-port").arg("operations");
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Failed to read settings"));

    Ok(())
}
