//! Declarative input for one provisioning operation.
//!
//! The model is the document an outer resource layer hands over: how to reach
//! the machine, which files to stage, system settings, and the execution
//! tool's scripts. It loads from YAML or JSON and fills in the same defaults
//! regardless of format.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ConnectionSpec;

/// Default data directory holding the deployed instances.
pub const DEFAULT_DATA_DIR: &str = "/mnt/aemc";
/// Default working directory for scratch files and lock markers.
pub const DEFAULT_WORK_DIR: &str = "/tmp/aemc";
/// Default execution tool version.
pub const DEFAULT_TOOL_VERSION: &str = "latest";

/// Default systemd unit; `DATA_DIR` and `USER` are substituted.
pub const DEFAULT_SERVICE_TEMPLATE: &str = r#"[Unit]
Description=AEM Instances
Requires=network.target
After=cloud-final.service

[Service]
Type=forking
User={{ USER }}
ExecStart=sh -c ". /etc/profile && cd {{ DATA_DIR }} && sh aemw instance start"
ExecStop=sh -c ". /etc/profile && cd {{ DATA_DIR }} && sh aemw instance stop"
ExecReload=sh -c ". /etc/profile && cd {{ DATA_DIR }} && sh aemw instance restart"
KillMode=process
RemainAfterExit=yes
TimeoutStartSec=1810
TimeoutStopSec=190
LimitNOFILE=20000

[Install]
WantedBy=multi-user.target
"#;

/// Errors raised while loading or validating a model.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ModelError {
    /// Raised when the model file cannot be read.
    #[error("cannot read model {path}: {message}")]
    Read {
        /// Model path.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the document does not deserialise.
    #[error("cannot parse model {path}: {message}")]
    Parse {
        /// Model path or `<inline>`.
        path: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Raised when a field holds an unusable value.
    #[error("invalid model field '{field}': {reason}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// What is wrong with the value.
        reason: String,
    },
}

/// Either an ordered list of inline commands, a multi-line script body, or
/// both; inline commands run first.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct InstanceScript {
    /// Commands run one by one; the first failure stops the rest.
    #[serde(default)]
    pub inline: Vec<String>,
    /// Multi-line script body run as a whole.
    #[serde(default)]
    pub script: String,
}

impl InstanceScript {
    /// Builds a script from inline commands.
    #[must_use]
    pub fn inline<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inline: commands.into_iter().map(Into::into).collect(),
            script: String::new(),
        }
    }

    /// Reports whether there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inline.is_empty() && self.script.trim().is_empty()
    }
}

/// How to reach the target machine.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct ClientModel {
    /// Backend type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Backend settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Backend credentials; settings win on collision.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    /// Connect budget for Create and Update, for example `10m`.
    #[serde(default)]
    pub action_timeout: Option<String>,
    /// Connect budget for Delete and status reads, for example `5m`.
    #[serde(default)]
    pub state_timeout: Option<String>,
    /// Limit on a single connection attempt, for example `10s`.
    #[serde(default)]
    pub connect_timeout: Option<String>,
    /// Limit on a single remote command, for example `30m`.
    #[serde(default)]
    pub read_timeout: Option<String>,
}

impl ClientModel {
    /// Connection declaration handed to the connection manager.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when a per-call timeout is malformed.
    pub fn connection_spec(&self) -> Result<ConnectionSpec, ModelError> {
        Ok(ConnectionSpec {
            kind: self.kind.clone(),
            settings: self.settings.clone(),
            credentials: self.credentials.clone(),
            connect_timeout: parse_optional(
                "client.connect_timeout",
                self.connect_timeout.as_deref(),
            )?,
            read_timeout: parse_optional("client.read_timeout", self.read_timeout.as_deref())?,
        })
    }

    /// Parsed [`ClientModel::action_timeout`], if declared.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when the duration is malformed.
    pub fn action_timeout(&self) -> Result<Option<Duration>, ModelError> {
        parse_optional("client.action_timeout", self.action_timeout.as_deref())
    }

    /// Parsed [`ClientModel::state_timeout`], if declared.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when the duration is malformed.
    pub fn state_timeout(&self) -> Result<Option<Duration>, ModelError> {
        parse_optional("client.state_timeout", self.state_timeout.as_deref())
    }
}

/// Host-level settings.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct SystemModel {
    /// Directory holding the execution tool and instances.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Directory for scratch files and lock markers.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Variables persisted to the profile fragment; they win over the
    /// client defaults.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Service unit template with `DATA_DIR` and `USER` variables.
    #[serde(default = "default_service_template")]
    pub service_config: String,
    /// User the service runs as; empty means the connecting user.
    #[serde(default)]
    pub user: String,
    /// One-time machine preparation, run at most once per work directory.
    #[serde(default)]
    pub bootstrap: InstanceScript,
}

impl Default for SystemModel {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            work_dir: default_work_dir(),
            env: BTreeMap::new(),
            service_config: default_service_template(),
            user: String::new(),
            bootstrap: InstanceScript::default(),
        }
    }
}

/// Execution tool settings.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct ComposeModel {
    /// Download the tool wrapper when it is missing.
    #[serde(default = "default_true")]
    pub download: bool,
    /// Tool version exported as `AEM_CLI_VERSION`.
    #[serde(default = "default_version")]
    pub version: String,
    /// Configuration payload written verbatim under the data directory.
    #[serde(default)]
    pub config: String,
    /// Provisions the instances; Create only.
    #[serde(default = "default_create_script")]
    pub create: InstanceScript,
    /// Idempotent configuration; every Create and Update.
    #[serde(default)]
    pub configure: InstanceScript,
    /// Tears the instances down before the data directory is removed.
    #[serde(default = "default_delete_script")]
    pub delete: InstanceScript,
}

impl Default for ComposeModel {
    fn default() -> Self {
        Self {
            download: true,
            version: default_version(),
            config: String::new(),
            create: default_create_script(),
            configure: InstanceScript::default(),
            delete: default_delete_script(),
        }
    }
}

/// Complete input for one operation.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct InstanceModel {
    /// Connection declaration.
    pub client: ClientModel,
    /// Local path to remote path pairs staged before configuration.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Host-level settings.
    #[serde(default)]
    pub system: SystemModel,
    /// Execution tool settings.
    #[serde(default)]
    pub compose: ComposeModel,
}

impl InstanceModel {
    /// Creates a model for `kind` with every other section defaulted.
    #[must_use]
    pub fn new(kind: &str) -> Self {
        Self {
            client: ClientModel {
                kind: kind.to_owned(),
                settings: BTreeMap::new(),
                credentials: BTreeMap::new(),
                action_timeout: None,
                state_timeout: None,
                connect_timeout: None,
                read_timeout: None,
            },
            files: BTreeMap::new(),
            system: SystemModel::default(),
            compose: ComposeModel::default(),
        }
    }

    /// Loads and validates a model file; `.json` files are read as JSON and
    /// everything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the file cannot be read, parsed, or
    /// validated.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ModelError> {
        let read_error = |message: String| ModelError::Read {
            path: path.to_string(),
            message,
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| read_error(String::from("path has no file name")))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| read_error(err.to_string()))?;
        let contents = dir
            .read_to_string(file_name)
            .map_err(|err| read_error(err.to_string()))?;

        let model = if path.extension() == Some("json") {
            serde_json::from_str::<Self>(&contents).map_err(|err| ModelError::Parse {
                path: path.to_string(),
                message: err.to_string(),
            })?
        } else {
            serde_yaml::from_str::<Self>(&contents).map_err(|err| ModelError::Parse {
                path: path.to_string(),
                message: err.to_string(),
            })?
        };
        model.validate()?;
        Ok(model)
    }

    /// Parses and validates a YAML (or JSON) document.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when parsing or validation fails.
    pub fn from_yaml(document: &str) -> Result<Self, ModelError> {
        let model: Self = serde_yaml::from_str(document).map_err(|err| ModelError::Parse {
            path: String::from("<inline>"),
            message: err.to_string(),
        })?;
        model.validate()?;
        Ok(model)
    }

    /// Checks fields that deserialise but cannot be used.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ModelError> {
        require("client.type", &self.client.kind)?;
        require("system.data_dir", &self.system.data_dir)?;
        require("system.work_dir", &self.system.work_dir)?;
        require("compose.version", &self.compose.version)?;
        self.client.action_timeout()?;
        self.client.state_timeout()?;
        self.client.connection_spec()?;

        if let Some(key) = self.system.env.keys().find(|key| !is_env_name(key)) {
            return Err(invalid(
                "system.env",
                &format!("'{key}' is not a valid environment variable name"),
            ));
        }
        if let Some((local, remote)) = self
            .files
            .iter()
            .find(|(local, remote)| local.trim().is_empty() || remote.trim().is_empty())
        {
            return Err(invalid(
                "files",
                &format!("'{local}' -> '{remote}' must name both paths"),
            ));
        }
        Ok(())
    }

    /// Path the configuration payload is written to.
    #[must_use]
    pub fn config_path(&self) -> String {
        format!(
            "{}/aem/default/etc/aem.yml",
            self.system.data_dir.trim_end_matches('/')
        )
    }

    /// Path of the execution tool wrapper.
    #[must_use]
    pub fn tool_path(&self) -> String {
        format!("{}/aemw", self.system.data_dir.trim_end_matches('/'))
    }
}

/// Parses a human-readable duration such as `10m`, `1h 30m` or `250ms`.
///
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns a description of the problem when the text is not a duration.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let text = raw.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).map_err(|err| format!("'{text}': {err}"))
}

fn parse_optional(field: &str, raw: Option<&str>) -> Result<Option<Duration>, ModelError> {
    raw.filter(|value| !value.trim().is_empty())
        .map(|value| parse_duration(value).map_err(|reason| invalid(field, &reason)))
        .transpose()
}

fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn require(field: &str, value: &str) -> Result<(), ModelError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ModelError {
    ModelError::Invalid {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_owned()
}

fn default_work_dir() -> String {
    DEFAULT_WORK_DIR.to_owned()
}

fn default_service_template() -> String {
    DEFAULT_SERVICE_TEMPLATE.to_owned()
}

fn default_version() -> String {
    DEFAULT_TOOL_VERSION.to_owned()
}

const fn default_true() -> bool {
    true
}

fn default_create_script() -> InstanceScript {
    InstanceScript::inline(["sh aemw instance init", "sh aemw instance create"])
}

fn default_delete_script() -> InstanceScript {
    InstanceScript::inline(["sh aemw instance delete"])
}
