//! AWS Systems Manager backend driving the `aws` CLI.
//!
//! Commands travel through `aws ssm start-session` with the
//! `AWS-StartInteractiveCommand` document. Session output carries banner
//! lines and no exit status, so every command is suffixed with a marker line
//! reporting `$?`, which is then stripped from the captured stdout.

use std::ffi::OsString;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::json;
use shell_escape::unix::escape;

use super::runner::{CommandOutput, CommandRunner};
use super::settings::Settings;
use super::shell;
use super::{Invocation, Transport, TransportError, TransportKind, TransportPrograms};

/// Marker prefix of the line reporting the remote exit status.
pub const SSM_EXIT_MARKER: &str = "__AEM_PROVISION_EXIT__";
const ONLINE: &str = "Online";
const DEFAULT_SSM_USER: &str = "ssm-user";
const SESSION_BANNERS: [&str; 2] = [
    "Starting session with SessionId",
    "Exiting session with sessionId",
];

/// Session-broker backend addressing an EC2 instance by identifier.
#[derive(Debug)]
pub struct SsmTransport<R: CommandRunner> {
    instance_id: String,
    region: Option<String>,
    profile: Option<String>,
    connect_timeout_secs: Option<u64>,
    user: String,
    aws_bin: String,
    runner: R,
}

impl<R: CommandRunner> SsmTransport<R> {
    /// Builds the backend from merged settings.
    ///
    /// Recognised keys: `instance_id` (required), `region`, `profile`,
    /// `connect_timeout` (seconds, passed to the CLI), and `user` (the
    /// session user, default `ssm-user`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidSettings`] when `instance_id` is
    /// missing or `connect_timeout` is not a number.
    pub fn from_settings(
        settings: &Settings,
        programs: &TransportPrograms,
        runner: R,
    ) -> Result<Self, TransportError> {
        let name = TransportKind::AwsSsm.as_str();
        Ok(Self {
            instance_id: settings.require(name, "instance_id")?.to_owned(),
            region: settings.optional("region").map(str::to_owned),
            profile: settings.optional("profile").map(str::to_owned),
            connect_timeout_secs: settings.parse_optional(name, "connect_timeout")?,
            user: settings
                .optional("user")
                .unwrap_or(DEFAULT_SSM_USER)
                .to_owned(),
            aws_bin: programs.aws_bin.clone(),
            runner,
        })
    }

    fn aws(&self, args: &[&str]) -> Result<CommandOutput, TransportError> {
        let mut full: Vec<OsString> = args.iter().map(OsString::from).collect();
        if let Some(region) = &self.region {
            full.push(OsString::from("--region"));
            full.push(OsString::from(region));
        }
        if let Some(profile) = &self.profile {
            full.push(OsString::from("--profile"));
            full.push(OsString::from(profile));
        }
        if let Some(secs) = self.connect_timeout_secs {
            full.push(OsString::from("--cli-connect-timeout"));
            full.push(OsString::from(secs.to_string()));
        }
        self.runner.run(&self.aws_bin, &full)
    }

    fn session(&self, line: &str) -> Result<CommandOutput, TransportError> {
        let wrapped = format!("{line}; printf '\\n{SSM_EXIT_MARKER}%s\\n' \"$?\"");
        let command = format!("sh -c {}", escape(wrapped.into()));
        let parameters = json!({ "command": [command] }).to_string();
        let raw = self.aws(&[
            "ssm",
            "start-session",
            "--target",
            &self.instance_id,
            "--document-name",
            "AWS-StartInteractiveCommand",
            "--parameters",
            &parameters,
        ])?;
        if !raw.is_success() {
            return Err(TransportError::CommandFailure {
                program: self.aws_bin.clone(),
                status: raw.code,
                status_text: raw.status_text(),
                stderr: raw.stderr,
            });
        }
        parse_session_output(raw).ok_or_else(|| TransportError::UnexpectedResponse {
            target: self.describe(),
            message: String::from("session ended without reporting an exit status"),
        })
    }

    fn upload_dir(
        &self,
        dir: &Dir,
        local: &Utf8Path,
        remote: &str,
    ) -> Result<(), TransportError> {
        let entries = dir.entries().map_err(|err| local_io(local, &err))?;
        for item in entries {
            let entry = item.map_err(|err| local_io(local, &err))?;
            let name = entry.file_name().map_err(|err| local_io(local, &err))?;
            let local_child = local.join(&name);
            let remote_child = format!("{}/{name}", remote.trim_end_matches('/'));
            let file_type = entry.file_type().map_err(|err| local_io(&local_child, &err))?;
            if file_type.is_dir() {
                let child = dir
                    .open_dir(&name)
                    .map_err(|err| local_io(&local_child, &err))?;
                self.upload_dir(&child, &local_child, &remote_child)?;
            } else {
                let content = dir.read(&name).map_err(|err| local_io(&local_child, &err))?;
                self.write_file(&remote_child, &content, &Default::default(), false)?;
            }
        }
        Ok(())
    }
}

impl<R: CommandRunner> Transport for SsmTransport<R> {
    fn describe(&self) -> String {
        format!("aws-ssm {}", self.instance_id)
    }

    fn user(&self) -> Option<String> {
        Some(self.user.clone())
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        let filter = format!("Key=InstanceIds,Values={}", self.instance_id);
        let output = self.aws(&[
            "ssm",
            "describe-instance-information",
            "--filters",
            &filter,
            "--query",
            "InstanceInformationList[0].PingStatus",
            "--output",
            "text",
        ])?;
        if !output.is_success() {
            return Err(TransportError::Unreachable {
                target: self.describe(),
                message: output.stderr.trim().to_owned(),
            });
        }
        match output.stdout.trim() {
            ONLINE => Ok(()),
            status => Err(TransportError::Unreachable {
                target: self.describe(),
                message: format!("agent ping status is '{status}'"),
            }),
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn execute(&self, invocation: &Invocation<'_>) -> Result<CommandOutput, TransportError> {
        self.session(&shell::render(invocation))
    }

    fn copy_path(
        &self,
        local: &Utf8Path,
        remote: &str,
        recursive: bool,
    ) -> Result<(), TransportError> {
        if local.is_dir() {
            if !recursive {
                return Err(TransportError::LocalIo {
                    path: local.to_string(),
                    message: String::from("is a directory and recursive copy was not requested"),
                });
            }
            let dir = Dir::open_ambient_dir(local, ambient_authority())
                .map_err(|err| local_io(local, &err))?;
            self.ensure_dir(remote, &Default::default(), false)?;
            return self.upload_dir(&dir, local, remote);
        }

        let parent = local
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = local.file_name().ok_or_else(|| TransportError::LocalIo {
            path: local.to_string(),
            message: String::from("path has no file name"),
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| local_io(parent, &err))?;
        let content = dir.read(file_name).map_err(|err| local_io(local, &err))?;
        self.write_file(remote, &content, &Default::default(), false)
    }
}

fn local_io(path: &Utf8Path, err: &std::io::Error) -> TransportError {
    TransportError::LocalIo {
        path: path.to_string(),
        message: err.to_string(),
    }
}

/// Strips session banners and the exit marker, recovering the exit status.
fn parse_session_output(raw: CommandOutput) -> Option<CommandOutput> {
    let mut code = None;
    let mut stdout = String::new();
    for line in raw.stdout.lines() {
        let clean = line.trim_end_matches('\r');
        if let Some(status) = clean.strip_prefix(SSM_EXIT_MARKER) {
            code = status.trim().parse().ok();
            continue;
        }
        if SESSION_BANNERS.iter().any(|banner| clean.starts_with(banner)) {
            continue;
        }
        stdout.push_str(clean);
        stdout.push('\n');
    }
    let trimmed = stdout.trim_end_matches('\n').len();
    stdout.truncate(trimmed);
    if !stdout.is_empty() {
        stdout.push('\n');
    }
    code.map(|status| CommandOutput {
        code: Some(status),
        stdout,
        stderr: raw.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_output_recovers_exit_status_and_strips_banners() {
        let raw = CommandOutput {
            code: Some(0),
            stdout: format!(
                "\r\nStarting session with SessionId: abc-123\r\nhello\r\n\r\n\
                 {SSM_EXIT_MARKER}3\r\n\r\nExiting session with sessionId: abc-123.\r\n"
            ),
            stderr: String::new(),
        };

        let parsed = parse_session_output(raw).expect("marker should be found");

        assert_eq!(parsed.code, Some(3));
        assert_eq!(parsed.stdout.trim(), "hello");
    }

    #[test]
    fn parse_session_output_without_marker_is_rejected() {
        let raw = CommandOutput::success("Starting session with SessionId: abc\nhello\n");

        assert!(parse_session_output(raw).is_none());
    }
}
