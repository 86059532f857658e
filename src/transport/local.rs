//! Local shell backend; the "target machine" is the host itself.

use std::ffi::OsString;

use camino::Utf8Path;

use super::runner::{CommandOutput, CommandRunner};
use super::shell;
use super::{Invocation, Transport, TransportError, TransportPrograms};

/// Runs every command through the local POSIX shell.
#[derive(Debug)]
pub struct LocalTransport<R: CommandRunner> {
    shell_bin: String,
    runner: R,
}

impl<R: CommandRunner> LocalTransport<R> {
    /// Builds the backend; it takes no settings.
    #[must_use]
    pub fn new(programs: &TransportPrograms, runner: R) -> Self {
        Self {
            shell_bin: programs.shell_bin.clone(),
            runner,
        }
    }

    fn shell(&self, line: &str) -> Result<CommandOutput, TransportError> {
        self.runner.run(
            &self.shell_bin,
            &[OsString::from("-c"), OsString::from(line)],
        )
    }
}

impl<R: CommandRunner> Transport for LocalTransport<R> {
    fn describe(&self) -> String {
        String::from("local shell")
    }

    fn user(&self) -> Option<String> {
        std::env::var("USER").ok().filter(|user| !user.is_empty())
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn execute(&self, invocation: &Invocation<'_>) -> Result<CommandOutput, TransportError> {
        self.shell(&shell::render(invocation))
    }

    fn copy_path(
        &self,
        local: &Utf8Path,
        remote: &str,
        recursive: bool,
    ) -> Result<(), TransportError> {
        let source = shell::quote_path(local.as_str());
        let target = shell::quote_path(remote);
        let line = if recursive && local.is_dir() {
            format!("mkdir -p {target} && cp -R {source}/. {target}")
        } else {
            format!(
                "mkdir -p {} && cp {} {source} {target}",
                shell::quote_path(shell::remote_parent(remote)),
                if recursive { "-R" } else { "-p" },
            )
        };
        self.shell(&line)?.into_stdout(&self.shell_bin).map(drop)
    }
}
