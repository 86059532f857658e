//! Reads the observable state of the deployed instances.
//!
//! The execution tool prints a YAML document whose `data.instances` list
//! describes every instance found under the data directory. Parsing keeps the
//! order of that list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{ClientError, RemoteClient};

/// Command printing the instance status document; runs in the data directory.
pub const STATUS_COMMAND: &str = "sh aemw instance status --output-format yaml";

/// Errors raised while reading instance status.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Raised when the status command exits non-zero or cannot be delivered.
    #[error("status command failed: {0}")]
    Command(#[source] ClientError),
    /// Raised when the status command succeeds but prints an unreadable
    /// document.
    #[error("unable to parse instance status: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },
}

/// One application instance discovered on the target.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InstanceDescriptor {
    /// Instance identifier, for example `author`.
    pub id: String,
    /// Base URL the instance listens on.
    pub url: String,
    /// Application version string.
    pub version: String,
    /// Instance home directory on the target.
    pub directory: String,
    /// State attributes such as `running` or `up-to-date`.
    pub attributes: BTreeSet<String>,
    /// Run modes the instance was started with.
    pub run_modes: BTreeSet<String>,
    /// Health checks reported by the tool, in reported order.
    pub health_checks: Vec<String>,
}

/// Ordered instance descriptors read from one machine.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InstanceStatus {
    /// Descriptors in the order the tool reported them.
    pub instances: Vec<InstanceDescriptor>,
}

impl InstanceStatus {
    /// Looks up a descriptor by identifier.
    #[must_use]
    pub fn instance(&self, id: &str) -> Option<&InstanceDescriptor> {
        self.instances.iter().find(|instance| instance.id == id)
    }
}

#[derive(Deserialize)]
struct StatusDocument {
    data: StatusData,
}

#[derive(Deserialize)]
struct StatusData {
    #[serde(default)]
    instances: Vec<StatusRecord>,
}

#[derive(Deserialize)]
struct StatusRecord {
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    aem_version: String,
    #[serde(default)]
    attributes: Vec<String>,
    #[serde(default)]
    run_modes: Vec<String>,
    #[serde(default)]
    health_checks: Vec<String>,
    #[serde(default)]
    dir: String,
}

impl From<StatusRecord> for InstanceDescriptor {
    fn from(record: StatusRecord) -> Self {
        Self {
            id: record.id,
            url: record.url,
            version: record.aem_version,
            directory: record.dir,
            attributes: record.attributes.into_iter().collect(),
            run_modes: record.run_modes.into_iter().collect(),
            health_checks: record.health_checks,
        }
    }
}

/// Parses a status document.
///
/// # Errors
///
/// Returns [`StatusError::Parse`] when the payload is not valid YAML or lacks
/// the `data` section.
pub fn parse_status(payload: &str) -> Result<InstanceStatus, StatusError> {
    let document: StatusDocument =
        serde_yaml::from_str(payload).map_err(|err| StatusError::Parse {
            message: err.to_string(),
        })?;
    Ok(InstanceStatus {
        instances: document
            .data
            .instances
            .into_iter()
            .map(InstanceDescriptor::from)
            .collect(),
    })
}

/// Runs [`STATUS_COMMAND`] in the client's data directory and parses it.
///
/// # Errors
///
/// Returns [`StatusError::Command`] when the command fails and
/// [`StatusError::Parse`] when its output is malformed.
pub fn read_status(client: &RemoteClient) -> Result<InstanceStatus, StatusError> {
    let stdout = client
        .run_shell_command(STATUS_COMMAND, client.data_dir())
        .map_err(StatusError::Command)?;
    parse_status(&String::from_utf8_lossy(&stdout))
}
