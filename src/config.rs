//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::connection::ConnectionManager;
use crate::transport::TransportPrograms;

/// Process-wide settings layered from defaults, `aem-provision.toml`, and
/// `AEM_PROVISION_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AEM_PROVISION",
    discovery(
        app_name = "aem-provision",
        env_var = "AEM_PROVISION_CONFIG_PATH",
        config_file_name = "aem-provision.toml",
        dotfile_name = ".aem-provision.toml",
        project_file_name = "aem-provision.toml"
    )
)]
pub struct ProvisionConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the AWS CLI executable.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Shell used by the local backend.
    #[ortho_config(default = "sh".to_owned())]
    pub shell_bin: String,
    /// Seconds between connection attempts.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Connect budget in seconds for Create and Update when the model
    /// declares none.
    #[ortho_config(default = 600)]
    pub action_timeout_secs: u64,
    /// Connect budget in seconds for Delete and status reads when the model
    /// declares none.
    #[ortho_config(default = 300)]
    pub state_timeout_secs: u64,
    /// Name of the host service unit and profile fragment.
    #[ortho_config(default = "aem".to_owned())]
    pub service_name: String,
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a configuration field holds an unusable value.
    #[error(
        "invalid configuration field {field}: {reason}; \
         set {env_var} or {field} in aem-provision.toml"
    )]
    InvalidField {
        /// Field name.
        field: String,
        /// Environment variable overriding the field.
        env_var: String,
        /// What is wrong with the value.
        reason: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl ProvisionConfig {
    /// Built-in defaults, identical to loading with no file or environment
    /// overrides.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            aws_bin: String::from("aws"),
            shell_bin: String::from("sh"),
            poll_interval_secs: 5,
            action_timeout_secs: 600,
            state_timeout_secs: 300,
            service_name: String::from("aem"),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when merging or validation fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("aem-provision")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects blank program paths, a zero poll interval, and a blank
    /// service name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("ssh_bin", &self.ssh_bin),
            ("scp_bin", &self.scp_bin),
            ("aws_bin", &self.aws_bin),
            ("shell_bin", &self.shell_bin),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be at least 1"));
        }
        let name = self.service_name.trim();
        if name.is_empty() || name.contains(['/', ' ']) {
            return Err(invalid(
                "service_name",
                "must be a non-empty name without slashes or spaces",
            ));
        }
        Ok(())
    }

    /// Local programs used by the shell-based backends.
    #[must_use]
    pub fn programs(&self) -> TransportPrograms {
        TransportPrograms {
            ssh_bin: self.ssh_bin.clone(),
            scp_bin: self.scp_bin.clone(),
            aws_bin: self.aws_bin.clone(),
            shell_bin: self.shell_bin.clone(),
        }
    }

    /// Delay between connection attempts.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Default connect budget for Create and Update.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    /// Default connect budget for Delete and status reads.
    #[must_use]
    pub const fn state_timeout(&self) -> Duration {
        Duration::from_secs(self.state_timeout_secs)
    }

    /// Connection manager for the built-in backends.
    #[must_use]
    pub fn connection_manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.programs()).with_poll_interval(self.poll_interval())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_owned(),
        env_var: format!("AEM_PROVISION_{}", field.to_ascii_uppercase()),
        reason: reason.to_owned(),
    }
}
