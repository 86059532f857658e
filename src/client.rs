//! Remote client façade used by the lifecycle orchestrator.
//!
//! [`RemoteClient`] wraps a connected [`Transport`] with the state every step
//! needs: exported environment variables, the working and data directories,
//! and a call-scoped privilege flag. Privilege is only ever raised through
//! [`RemoteClient::privileged`], whose guard lowers it again when dropped.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tracing::debug;

use crate::transport::{Invocation, Transport, TransportError, shell};

/// Directory holding shell profile fragments on the target.
pub const PROFILE_DIR: &str = "/etc/profile.d";

/// Errors raised by remote client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Raised when a backend cannot be selected or constructed.
    #[error("cannot set up {kind} connection: {source}")]
    Backend {
        /// Declared transport type.
        kind: String,
        /// Construction failure.
        #[source]
        source: TransportError,
    },
    /// Raised when the connect retry budget is exhausted.
    #[error("cannot connect over {kind} after {attempts} attempt(s) in {elapsed:?}: {source}")]
    Connection {
        /// Declared transport type.
        kind: String,
        /// Number of connection attempts made.
        attempts: usize,
        /// Time spent before giving up.
        elapsed: Duration,
        /// Failure of the last attempt.
        #[source]
        source: TransportError,
    },
    /// Raised when a command or script exits non-zero or cannot be delivered.
    #[error("command '{command}' failed: {source}")]
    Command {
        /// Command text or script name.
        command: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
    /// Raised when a file operation fails.
    #[error("cannot {op} '{path}': {source}")]
    FileOperation {
        /// Operation name, for example `write` or `copy`.
        op: String,
        /// Target path of the operation.
        path: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
}

/// Connected façade over a transport backend.
///
/// Instances are only produced by
/// [`ConnectionManager::connect`](crate::connection::ConnectionManager::connect),
/// so every client handed to the orchestrator has connected successfully.
pub struct RemoteClient {
    transport: Box<dyn Transport>,
    kind: String,
    env: BTreeMap<String, String>,
    work_dir: String,
    data_dir: String,
    sudo: bool,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("transport", &self.transport.describe())
            .field("env", &self.env)
            .field("work_dir", &self.work_dir)
            .field("data_dir", &self.data_dir)
            .field("sudo", &self.sudo)
            .finish()
    }
}

impl RemoteClient {
    pub(crate) fn connected(transport: Box<dyn Transport>, kind: &str) -> Self {
        Self {
            transport,
            kind: kind.to_owned(),
            env: BTreeMap::new(),
            work_dir: String::from("."),
            data_dir: String::from("."),
            sudo: false,
        }
    }

    /// Declared transport type this client was built from.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Connection summary for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// User the backend operates as, when known.
    #[must_use]
    pub fn user(&self) -> Option<String> {
        self.transport.user()
    }

    /// Variables exported before every command.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Exports `key=value` for subsequent commands.
    pub fn set_env(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_owned(), value.to_owned());
    }

    /// Working directory for tool downloads and scratch files.
    #[must_use]
    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    /// Sets the working directory.
    pub fn set_work_dir(&mut self, dir: &str) {
        dir.clone_into(&mut self.work_dir);
    }

    /// Data directory holding the deployed instances.
    #[must_use]
    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    /// Sets the data directory.
    pub fn set_data_dir(&mut self, dir: &str) {
        dir.clone_into(&mut self.data_dir);
    }

    /// Reports whether operations currently run with elevated privileges.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.sudo
    }

    /// Raises privileges until the returned guard is dropped.
    ///
    /// The flag is lowered on every exit path, including early returns
    /// through `?` and unwinding.
    pub fn privileged(&mut self) -> Privileged<'_> {
        self.sudo = true;
        Privileged { client: self }
    }

    fn invocation<'a>(&'a self, command: &'a str, dir: &'a str) -> Invocation<'a> {
        Invocation {
            command,
            dir,
            env: &self.env,
            sudo: self.sudo,
        }
    }

    /// Runs `command` in `dir` and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Command`] on non-zero exit or transport failure.
    pub fn run_shell_command(&self, command: &str, dir: &str) -> Result<Vec<u8>, ClientError> {
        debug!(command, dir, sudo = self.sudo, "running command");
        self.transport
            .run_command(&self.invocation(command, dir))
            .map_err(|source| ClientError::Command {
                command: command.to_owned(),
                source,
            })
    }

    /// Runs a named script body in `dir` and returns its stdout.
    ///
    /// The name only serves traceability; execution matches
    /// [`RemoteClient::run_shell_command`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Command`] referencing the body that failed.
    pub fn run_shell_script(
        &self,
        name: &str,
        body: &str,
        dir: &str,
    ) -> Result<Vec<u8>, ClientError> {
        self.transport
            .run_script(name, &self.invocation(body, dir))
            .map_err(|source| ClientError::Command {
                command: body.to_owned(),
                source,
            })
    }

    /// Creates `path` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileOperation`] when creation fails.
    pub fn dir_ensure(&self, path: &str) -> Result<(), ClientError> {
        self.transport
            .ensure_dir(path, &self.env, self.sudo)
            .map_err(|source| file_error("create directory", path, source))
    }

    /// Reports whether `path` exists.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileOperation`] when the probe fails.
    pub fn file_exists(&self, path: &str) -> Result<bool, ClientError> {
        self.transport
            .file_exists(path, &self.env, self.sudo)
            .map_err(|source| file_error("check existence of", path, source))
    }

    /// Writes `content` to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileOperation`] when the write fails.
    pub fn file_write(&self, path: &str, content: &[u8]) -> Result<(), ClientError> {
        self.transport
            .write_file(path, content, &self.env, self.sudo)
            .map_err(|source| file_error("write", path, source))
    }

    /// Copies a local file or directory to `remote`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileOperation`] when the transfer fails.
    pub fn path_copy(
        &self,
        local: &Utf8Path,
        remote: &str,
        recursive: bool,
    ) -> Result<(), ClientError> {
        debug!(%local, remote, recursive, "copying path");
        self.transport
            .copy_path(local, remote, recursive)
            .map_err(|source| file_error("copy", &format!("{local} -> {remote}"), source))
    }

    /// Removes `path` recursively.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileOperation`] when removal fails.
    pub fn path_delete(&self, path: &str) -> Result<(), ClientError> {
        self.transport
            .delete_path(path, &self.env, self.sudo)
            .map_err(|source| file_error("delete", path, source))
    }

    /// Persists the client environment merged with `overrides` as
    /// `/etc/profile.d/<service_name>.sh` so later-launched processes see it.
    ///
    /// Overrides win on key collision. Returns the path written.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileOperation`] when the write fails.
    pub fn save_env_profile(
        &mut self,
        service_name: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<String, ClientError> {
        let mut merged = self.env.clone();
        merged.extend(
            overrides
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        let path = format!("{PROFILE_DIR}/{service_name}.sh");
        let content = shell::env_script(&merged);
        self.privileged().file_write(&path, content.as_bytes())?;
        Ok(path)
    }

    /// Releases the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the backend cannot clean up.
    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        self.transport.disconnect()
    }
}

/// Scope of elevated privileges on a [`RemoteClient`].
#[derive(Debug)]
pub struct Privileged<'a> {
    client: &'a mut RemoteClient,
}

impl Deref for Privileged<'_> {
    type Target = RemoteClient;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl Drop for Privileged<'_> {
    fn drop(&mut self) {
        self.client.sudo = false;
    }
}

fn file_error(op: &str, path: &str, source: TransportError) -> ClientError {
    ClientError::FileOperation {
        op: op.to_owned(),
        path: path.to_owned(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockTransport};

    fn client(mock: &MockTransport) -> RemoteClient {
        RemoteClient::connected(Box::new(mock.clone()), "mock")
    }

    #[test]
    fn commands_carry_client_env_and_directory() {
        let mock = MockTransport::new();
        let mut remote = client(&mock);
        remote.set_env("AEM_OUTPUT_LOG_MODE", "both");

        remote
            .run_shell_command("sh aemw instance status", "/mnt/aemc")
            .expect("command should succeed");

        let Some(MockCall::Command { dir, env, sudo, .. }) = mock.calls().into_iter().next()
        else {
            panic!("expected a command call");
        };
        assert_eq!(dir, "/mnt/aemc");
        assert_eq!(env.get("AEM_OUTPUT_LOG_MODE").map(String::as_str), Some("both"));
        assert!(!sudo);
    }

    #[test]
    fn privilege_is_scoped_to_the_guard() {
        let mock = MockTransport::new();
        let mut remote = client(&mock);

        {
            let elevated = remote.privileged();
            assert!(elevated.is_privileged());
            elevated
                .run_shell_command("systemctl enable aem.service", ".")
                .expect("command should succeed");
        }
        remote
            .run_shell_command("whoami", ".")
            .expect("command should succeed");

        assert!(!remote.is_privileged());
        assert_eq!(
            mock.labels(),
            vec!["run+sudo: systemctl enable aem.service", "run: whoami"]
        );
    }

    #[test]
    fn privilege_is_lowered_when_the_scoped_operation_fails() {
        let mock = MockTransport::new().failing_command("systemctl", 5);
        let mut remote = client(&mock);

        let result = remote
            .privileged()
            .run_shell_command("systemctl start aem.service", ".");

        let err = result.expect_err("command should fail");
        assert!(!remote.is_privileged());
        assert!(err.to_string().contains("systemctl start aem.service"), "{err}");
    }

    #[test]
    fn file_errors_name_operation_and_path() {
        let mock = MockTransport::new().failing_write("aem.yml");
        let remote = client(&mock);

        let err = remote
            .file_write("/mnt/aemc/aem/default/etc/aem.yml", b"x")
            .expect_err("write should fail");

        assert!(
            matches!(err, ClientError::FileOperation { ref op, ref path, .. }
                if op == "write" && path == "/mnt/aemc/aem/default/etc/aem.yml"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn env_profile_merges_overrides_over_client_env() {
        let mock = MockTransport::new();
        let mut remote = client(&mock);
        remote.set_env("AEM_CLI_VERSION", "latest");
        remote.set_env("JAVA_HOME", "/usr/lib/jvm/default");
        let overrides =
            BTreeMap::from([(String::from("JAVA_HOME"), String::from("/opt/jdk-11"))]);

        let path = remote
            .save_env_profile("aem", &overrides)
            .expect("profile should be written");

        assert_eq!(path, "/etc/profile.d/aem.sh");
        assert_eq!(
            mock.file(&path).as_deref(),
            Some("export AEM_CLI_VERSION=latest\nexport JAVA_HOME=/opt/jdk-11\n")
        );
        assert_eq!(mock.labels(), vec!["write+sudo: /etc/profile.d/aem.sh"]);
        assert!(!remote.is_privileged());
    }
}
