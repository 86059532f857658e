//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_lifecycle_subcommands() {
    let mut cmd = cargo_bin_cmd!("aem-provision");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(contains("create"))
        .stdout(contains("update"))
        .stdout(contains("delete"))
        .stdout(contains("status"));
}

#[test]
fn missing_model_file_fails_with_read_error() {
    let tmp = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("aem-provision");
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .args(["status", "--model", "absent.yaml"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("cannot read model absent.yaml"));
}

#[test]
fn invalid_configuration_is_reported() {
    let tmp = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("aem-provision");
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .env("AEM_PROVISION_POLL_INTERVAL_SECS", "0")
        .args(["create", "--model", "instance.yaml"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("configuration error"));
}
