//! Transport backends for reaching a target machine.
//!
//! A [`Transport`] is one concrete way of running shell commands and moving
//! files on a machine: key-based SSH, an AWS SSM session, or the local shell.
//! Backends are built from a loosely typed settings map and validate their
//! required keys at construction, so a bad declaration fails before the first
//! connection attempt rather than midway through a convergence.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tracing::debug;

mod local;
mod runner;
mod settings;
pub mod shell;
mod ssh;
mod ssm;

pub use local::LocalTransport;
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use settings::Settings;
pub use ssh::SshTransport;
pub use ssm::{SSM_EXIT_MARKER, SsmTransport};

/// Discriminators of the built-in backends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransportKind {
    /// Direct key-based SSH access.
    Ssh,
    /// AWS Systems Manager session broker.
    AwsSsm,
    /// Commands run in the local shell; connecting is a no-op.
    Local,
}

impl TransportKind {
    /// Type name used in connection declarations.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::AwsSsm => "aws-ssm",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "ssh" => Ok(Self::Ssh),
            "aws-ssm" | "aws_ssm" => Ok(Self::AwsSsm),
            "local" => Ok(Self::Local),
            other => Err(TransportError::UnsupportedTransport {
                name: other.to_owned(),
            }),
        }
    }
}

/// Local executables the shell-based backends delegate to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportPrograms {
    /// `ssh` client binary.
    pub ssh_bin: String,
    /// `scp` client binary.
    pub scp_bin: String,
    /// AWS CLI binary.
    pub aws_bin: String,
    /// POSIX shell used by the local backend.
    pub shell_bin: String,
}

impl Default for TransportPrograms {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            aws_bin: String::from("aws"),
            shell_bin: String::from("sh"),
        }
    }
}

/// One command to run on the target, with its execution environment.
#[derive(Clone, Copy, Debug)]
pub struct Invocation<'a> {
    /// Shell command text.
    pub command: &'a str,
    /// Working directory the command runs in.
    pub dir: &'a str,
    /// Variables exported before the command runs.
    pub env: &'a BTreeMap<String, String>,
    /// Whether the command runs with elevated privileges.
    pub sudo: bool,
}

impl<'a> Invocation<'a> {
    /// Builds an invocation without extra environment in the root directory.
    #[must_use]
    pub const fn bare(command: &'a str, env: &'a BTreeMap<String, String>, sudo: bool) -> Self {
        Self {
            command,
            dir: "/",
            env,
            sudo,
        }
    }
}

/// Errors raised by transport backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the declared type name matches no backend.
    #[error("unsupported transport type '{name}'")]
    UnsupportedTransport {
        /// Type name from the connection declaration.
        name: String,
    },
    /// Raised when a backend setting is missing or malformed.
    #[error("invalid {transport} settings: '{key}' {reason}")]
    InvalidSettings {
        /// Backend the settings were meant for.
        transport: String,
        /// Offending settings key.
        key: String,
        /// What is wrong with the value.
        reason: String,
    },
    /// Raised when a local helper program cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program used to reach the target.
        program: String,
        /// Exit status as reported, if any.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when a command outlives the read timeout and is killed.
    #[error("{program} did not finish within {timeout:?}")]
    Timeout {
        /// Program that was killed.
        program: String,
        /// Limit that expired.
        timeout: Duration,
    },
    /// Raised when the target cannot be reached yet.
    #[error("{target} is not reachable: {message}")]
    Unreachable {
        /// Connection summary of the target.
        target: String,
        /// Reason reported by the probe.
        message: String,
    },
    /// Raised when the target replies with output the backend cannot read.
    #[error("unexpected response from {target}: {message}")]
    UnexpectedResponse {
        /// Connection summary of the target.
        target: String,
        /// Description of the unexpected output.
        message: String,
    },
    /// Raised when a local file needed by the backend cannot be accessed.
    #[error("local file {path}: {message}")]
    LocalIo {
        /// Local path involved.
        path: String,
        /// Operating system error string.
        message: String,
    },
}

/// Capability set every backend implements.
///
/// Only [`Transport::execute`] and [`Transport::copy_path`] are backend
/// specific; the file operations default to shell renderings over the command
/// channel so that privilege escalation applies to them uniformly.
pub trait Transport {
    /// Human-readable connection summary for logging.
    fn describe(&self) -> String;

    /// User the backend operates as on the target, when known.
    fn user(&self) -> Option<String>;

    /// Establishes (or probes) the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] while the target is not reachable.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Releases resources held for the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when cleanup fails.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Runs one invocation and returns its raw output without judging the
    /// exit status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the command cannot be delivered.
    fn execute(&self, invocation: &Invocation<'_>) -> Result<CommandOutput, TransportError>;

    /// Copies a local path onto the target.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the transfer fails.
    fn copy_path(
        &self,
        local: &Utf8Path,
        remote: &str,
        recursive: bool,
    ) -> Result<(), TransportError>;

    /// Runs a command and returns its stdout, failing on non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailure`] on non-zero exit, or any
    /// delivery error from [`Transport::execute`].
    fn run_command(&self, invocation: &Invocation<'_>) -> Result<Vec<u8>, TransportError> {
        let program = self.describe();
        self.execute(invocation)?.into_stdout(&program)
    }

    /// Runs a named script body; the name only serves traceability.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::run_command`].
    fn run_script(
        &self,
        name: &str,
        invocation: &Invocation<'_>,
    ) -> Result<Vec<u8>, TransportError> {
        debug!(script = name, dir = invocation.dir, "running script body");
        self.run_command(invocation)
    }

    /// Reports whether `path` exists on the target.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the probe cannot be run or answered.
    fn file_exists(
        &self,
        path: &str,
        env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<bool, TransportError> {
        let command = shell::file_exists_command(path);
        let stdout = self.run_command(&Invocation::bare(&command, env, sudo))?;
        let text = String::from_utf8_lossy(&stdout);
        shell::parse_exists(&text).ok_or_else(|| TransportError::UnexpectedResponse {
            target: self.describe(),
            message: format!("existence probe for {path} returned '{}'", text.trim()),
        })
    }

    /// Writes `content` to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the write fails.
    fn write_file(
        &self,
        path: &str,
        content: &[u8],
        env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<(), TransportError> {
        let command = shell::write_file_command(path, content);
        self.run_command(&Invocation::bare(&command, env, sudo))
            .map(drop)
    }

    /// Creates `path` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the directory cannot be created.
    fn ensure_dir(
        &self,
        path: &str,
        env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<(), TransportError> {
        let command = shell::ensure_dir_command(path);
        self.run_command(&Invocation::bare(&command, env, sudo))
            .map(drop)
    }

    /// Removes `path` recursively.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when removal fails.
    fn delete_path(
        &self,
        path: &str,
        env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<(), TransportError> {
        let command = shell::delete_path_command(path);
        self.run_command(&Invocation::bare(&command, env, sudo))
            .map(drop)
    }
}

/// Builds a built-in backend from its kind and merged settings.
///
/// `read_timeout` bounds every process the backend starts.
///
/// # Errors
///
/// Returns [`TransportError::InvalidSettings`] when a required key is missing
/// or malformed for the selected backend.
pub fn build(
    kind: TransportKind,
    settings: &Settings,
    programs: &TransportPrograms,
    read_timeout: Option<Duration>,
) -> Result<Box<dyn Transport>, TransportError> {
    let runner = ProcessCommandRunner::with_timeout(read_timeout);
    let transport: Box<dyn Transport> = match kind {
        TransportKind::Ssh => Box::new(SshTransport::from_settings(settings, programs, runner)?),
        TransportKind::AwsSsm => Box::new(SsmTransport::from_settings(settings, programs, runner)?),
        TransportKind::Local => Box::new(LocalTransport::new(programs, runner)),
    };
    Ok(transport)
}
