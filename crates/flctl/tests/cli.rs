//! Runs the `flctl` binary against a scripted metadata client.
//!
//! The client is `sh` running a `get` script from the working directory, so
//! `sh get -l` and `sh get -i <id> -ri` answer the two metadata queries.
#![cfg(unix)]

use std::{path::Path, process::Command};

use testresult::TestResult;

const CLIENT: &str = r#"case "$1" in
  -l) cat listing.json ;;
  -i) cat resources.json ;;
  *) exit 1 ;;
esac
"#;

const LISTING: &str = r#"{"items": [{
    "date": 1589371980,
    "duration": 320,
    "id": 214061,
    "name": "routing",
    "resources": ["m3-4.grenoble.iot-lab.info", "m3-5.grenoble.iot-lab.info"],
    "state": "Terminated"
}]}"#;

fn workdir(listing: &str, resources: &str) -> std::io::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("get"), CLIENT)?;
    std::fs::write(dir.path().join("listing.json"), listing)?;
    std::fs::write(dir.path().join("resources.json"), resources)?;
    Ok(dir)
}

fn flctl(dir: &Path, site: &str) -> std::io::Result<std::process::Output> {
    Command::new(env!("CARGO_BIN_EXE_flctl"))
        .args(["214061", site, "--cli-program", "sh", "--transport", "dry-run"])
        .args(["--seed", "11"])
        .current_dir(dir)
        .env("FAULTLINE_DISABLE_LOGS", "1")
        .env_remove("FAULTLINE_CONFIG")
        .env_remove("FAULTLINE_CLI_PROGRAM")
        .output()
}

#[test]
fn empty_listing_exits_with_2() -> TestResult {
    let dir = workdir(r#"{"items": []}"#, r#"{"items": []}"#)?;
    let output = flctl(dir.path(), "grenoble")?;
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no experiments listed"), "{stderr}");
    Ok(())
}

#[test]
fn site_without_nodes_exits_with_3() -> TestResult {
    let dir = workdir(LISTING, r#"{"items": [{"grenoble": {"m3": "4-5"}}]}"#)?;
    let output = flctl(dir.path(), "lille")?;
    assert_eq!(output.status.code(), Some(3));
    Ok(())
}

#[test]
fn finished_experiment_ends_without_ticking() -> TestResult {
    let dir = workdir(LISTING, r#"{"items": [{"grenoble": {"m3": "4-5+11"}}]}"#)?;
    let output = flctl(dir.path(), "grenoble")?;
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let log = std::fs::read_to_string(dir.path().join("214061.log"))?;
    let lines: Vec<_> = log.lines().collect();
    assert!(lines[0].ends_with(";root;Experiment Starting"));
    assert!(lines.last().is_some_and(|l| l.ends_with(";root;Experiment Finished")));
    Ok(())
}
