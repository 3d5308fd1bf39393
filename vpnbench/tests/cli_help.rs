use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn top_level_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("vpnbench");
    let output = cmd
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    for sub in ["run", "locations", "status", "restore"] {
        assert!(text.contains(sub), "help missing '{sub}' subcommand");
    }
    assert!(text.contains("--results-dir"), "help missing --results-dir");
    assert!(
        text.contains("--command-timeout"),
        "help missing --command-timeout"
    );
}

#[test]
fn status_on_empty_directory_reports_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("vpnbench");
    cmd.current_dir(dir.path())
        .arg("status")
        .arg("--results-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No result files"));
}

#[test]
fn status_lists_tested_locations() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("adguard_speedtest_results_20240101_000000.csv"),
        "ISO,Country,City,Ping Estimate,download\nUS,United States,New York,12,1\nDE,Germany,Frankfurt,34,2\n",
    )
    .unwrap();

    let mut cmd = cargo_bin_cmd!("vpnbench");
    cmd.current_dir(dir.path())
        .arg("status")
        .arg("--results-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("2 locations tested: DE US"));
}

#[test]
fn run_without_sudo_context_exits_with_guidance() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("vpnbench");
    cmd.current_dir(dir.path())
        .env_remove("SUDO_USER")
        .arg("run")
        .arg("--no-log-file")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("sudo"));
}
