//! Key-based SSH backend driving the system `ssh` and `scp` clients.

use std::ffi::OsString;
use std::io::Write;

use camino::Utf8Path;
use tempfile::NamedTempFile;

use super::runner::{CommandOutput, CommandRunner};
use super::settings::Settings;
use super::shell;
use super::{Invocation, Transport, TransportError, TransportKind, TransportPrograms};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Default per-attempt SSH connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u16 = 10;
/// Default interval between SSH keepalive probes in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u16 = 15;
/// Unanswered keepalive probes before the session is dropped.
const KEEPALIVE_COUNT_MAX: u8 = 3;

#[derive(Clone, Debug, Eq, PartialEq)]
enum KeySource {
    Material(String),
    File(String),
    Agent,
}

/// SSH backend reaching `user@host:port`.
#[derive(Debug)]
pub struct SshTransport<R: CommandRunner> {
    host: String,
    port: u16,
    user: String,
    secure: bool,
    connect_timeout_secs: u16,
    keepalive_secs: u16,
    key: KeySource,
    ssh_bin: String,
    scp_bin: String,
    runner: R,
    key_file: Option<NamedTempFile>,
}

impl<R: CommandRunner> SshTransport<R> {
    /// Builds the backend from merged settings.
    ///
    /// Recognised keys: `host` and `user` (required), `port` (default 22),
    /// `secure` (strict host key checking, default `true`),
    /// `connect_timeout` (seconds per attempt, default 10),
    /// `keepalive_interval` (seconds between keepalive probes, default 15),
    /// and either `private_key` (key material) or `private_key_file`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidSettings`] when a required key is
    /// missing or a numeric or boolean setting does not parse.
    pub fn from_settings(
        settings: &Settings,
        programs: &TransportPrograms,
        runner: R,
    ) -> Result<Self, TransportError> {
        let name = TransportKind::Ssh.as_str();
        let host = settings.require(name, "host")?.to_owned();
        let user = settings.require(name, "user")?.to_owned();
        let port = settings.parse_or(name, "port", DEFAULT_SSH_PORT)?;
        let secure = settings.flag(name, "secure", true)?;
        let connect_timeout_secs =
            settings.parse_or(name, "connect_timeout", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        let keepalive_secs =
            settings.parse_or(name, "keepalive_interval", DEFAULT_KEEPALIVE_SECS)?;
        let key = match (
            settings.get("private_key").filter(|key| !key.trim().is_empty()),
            settings.optional("private_key_file"),
        ) {
            (Some(material), _) => KeySource::Material(material.to_owned()),
            (None, Some(path)) => KeySource::File(path.to_owned()),
            (None, None) => KeySource::Agent,
        };

        Ok(Self {
            host,
            port,
            user,
            secure,
            connect_timeout_secs,
            keepalive_secs,
            key,
            ssh_bin: programs.ssh_bin.clone(),
            scp_bin: programs.scp_bin.clone(),
            runner,
            key_file: None,
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn identity_path(&self) -> Option<String> {
        match &self.key {
            KeySource::Material(_) => self
                .key_file
                .as_ref()
                .map(|file| file.path().to_string_lossy().into_owned()),
            KeySource::File(path) => Some(path.clone()),
            KeySource::Agent => None,
        }
    }

    fn common_options(&self, port_flag: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(port_flag),
            OsString::from(self.port.to_string()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from(format!("ConnectTimeout={}", self.connect_timeout_secs)),
            OsString::from("-o"),
            OsString::from(format!("ServerAliveInterval={}", self.keepalive_secs)),
            OsString::from("-o"),
            OsString::from(format!("ServerAliveCountMax={KEEPALIVE_COUNT_MAX}")),
        ];
        if !self.secure {
            args.extend([
                OsString::from("-o"),
                OsString::from("StrictHostKeyChecking=no"),
                OsString::from("-o"),
                OsString::from("UserKnownHostsFile=/dev/null"),
            ]);
        }
        if let Some(identity) = self.identity_path() {
            args.push(OsString::from("-i"));
            args.push(OsString::from(identity));
        }
        args
    }

    fn ssh(&self, remote_command: &str) -> Result<CommandOutput, TransportError> {
        let mut args = self.common_options("-p");
        args.push(OsString::from(self.destination()));
        args.push(OsString::from(remote_command));
        self.runner.run(&self.ssh_bin, &args)
    }

    fn materialise_key(&mut self) -> Result<(), TransportError> {
        let KeySource::Material(material) = &self.key else {
            return Ok(());
        };
        if self.key_file.is_some() {
            return Ok(());
        }
        let io_error = |err: std::io::Error| TransportError::LocalIo {
            path: String::from("private key file"),
            message: err.to_string(),
        };
        let mut file = tempfile::Builder::new()
            .prefix("aem-provision-key-")
            .tempfile()
            .map_err(io_error)?;
        file.write_all(material.as_bytes()).map_err(io_error)?;
        if !material.ends_with('\n') {
            file.write_all(b"\n").map_err(io_error)?;
        }
        file.flush().map_err(io_error)?;
        self.key_file = Some(file);
        Ok(())
    }
}

impl<R: CommandRunner> Transport for SshTransport<R> {
    fn describe(&self) -> String {
        format!("ssh {}:{}", self.destination(), self.port)
    }

    fn user(&self) -> Option<String> {
        Some(self.user.clone())
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        self.materialise_key()?;
        let output = self.ssh("true")?;
        if output.is_success() {
            return Ok(());
        }
        Err(TransportError::Unreachable {
            target: self.describe(),
            message: format!(
                "probe exited with status {}: {}",
                output.status_text(),
                output.stderr.trim()
            ),
        })
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        match self.key_file.take() {
            Some(file) => file.close().map_err(|err| TransportError::LocalIo {
                path: String::from("private key file"),
                message: err.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn execute(&self, invocation: &Invocation<'_>) -> Result<CommandOutput, TransportError> {
        self.ssh(&shell::render(invocation))
    }

    fn copy_path(
        &self,
        local: &Utf8Path,
        remote: &str,
        recursive: bool,
    ) -> Result<(), TransportError> {
        let copy_contents = recursive && local.is_dir();
        let target_dir = if copy_contents {
            remote
        } else {
            shell::remote_parent(remote)
        };
        let mkdir = shell::ensure_dir_command(target_dir);
        self.ssh(&mkdir)?.into_stdout(&self.ssh_bin)?;

        let mut args = self.common_options("-P");
        if recursive {
            args.push(OsString::from("-r"));
        }
        let source = if copy_contents {
            format!("{local}/.")
        } else {
            local.to_string()
        };
        args.push(OsString::from(source));
        args.push(OsString::from(format!("{}:{remote}", self.destination())));
        self.runner.run(&self.scp_bin, &args)?.into_stdout(&self.scp_bin)?;
        Ok(())
    }
}
