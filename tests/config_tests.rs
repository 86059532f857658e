//! Tests for process configuration loading and validation.

use aem_provision::{ConfigError, ProvisionConfig, test_support::EnvGuard};
use rstest::rstest;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn defaults_pass_validation() {
    let config = ProvisionConfig::defaults();

    config
        .validate()
        .unwrap_or_else(|err| panic!("defaults should validate: {err}"));
    assert_eq!(config.poll_interval(), Duration::from_secs(5));
    assert_eq!(config.action_timeout(), Duration::from_secs(600));
    assert_eq!(config.state_timeout(), Duration::from_secs(300));
    assert_eq!(config.service_name, "aem");
}

fn blank_ssh(cfg: &mut ProvisionConfig) {
    cfg.ssh_bin = String::new();
}

fn blank_aws(cfg: &mut ProvisionConfig) {
    cfg.aws_bin = String::from("  ");
}

fn zero_poll(cfg: &mut ProvisionConfig) {
    cfg.poll_interval_secs = 0;
}

fn service_with_slash(cfg: &mut ProvisionConfig) {
    cfg.service_name = String::from("aem/author");
}

#[rstest]
#[case::blank_ssh(blank_ssh, "AEM_PROVISION_SSH_BIN")]
#[case::blank_aws(blank_aws, "AEM_PROVISION_AWS_BIN")]
#[case::zero_poll(zero_poll, "AEM_PROVISION_POLL_INTERVAL_SECS")]
#[case::service_with_slash(service_with_slash, "AEM_PROVISION_SERVICE_NAME")]
fn validation_errors_name_the_override(
    #[case] mutate: fn(&mut ProvisionConfig),
    #[case] env_var: &str,
) {
    let mut config = ProvisionConfig::defaults();
    mutate(&mut config);

    let err = config.validate().expect_err("validation should fail");

    let ConfigError::InvalidField {
        env_var: ref reported,
        ..
    } = err
    else {
        panic!("expected InvalidField, got {err}");
    };
    assert_eq!(reported, env_var);
    assert!(
        err.to_string().contains("aem-provision.toml"),
        "error should mention config file: {err}"
    );
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let home = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let home_path = home.path().to_string_lossy().to_string();
    let _guard = EnvGuard::set_vars(&[
        ("HOME", home_path.as_str()),
        ("XDG_CONFIG_HOME", home_path.as_str()),
        ("AEM_PROVISION_SERVICE_NAME", "aem-author"),
        ("AEM_PROVISION_POLL_INTERVAL_SECS", "2"),
    ])
    .await;

    let config = ProvisionConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("configuration should load: {err}"));

    assert_eq!(config.service_name, "aem-author");
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.ssh_bin, "ssh");
}

#[tokio::test]
async fn invalid_environment_value_is_rejected() {
    let home = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let home_path = home.path().to_string_lossy().to_string();
    let _guard = EnvGuard::set_vars(&[
        ("HOME", home_path.as_str()),
        ("XDG_CONFIG_HOME", home_path.as_str()),
        ("AEM_PROVISION_POLL_INTERVAL_SECS", "0"),
    ])
    .await;

    let err = ProvisionConfig::load_without_cli_args()
        .expect_err("zero poll interval should be rejected");

    assert!(
        err.to_string().contains("AEM_PROVISION_POLL_INTERVAL_SECS"),
        "unexpected error: {err}"
    );
}
