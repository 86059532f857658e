//! Process execution seam shared by the shell-based transports.

use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::TransportError;

const WAIT_POLL: Duration = Duration::from_millis(20);

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Builds a successful output carrying `stdout`.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Human readable representation of the exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }

    /// Converts the output into stdout bytes, failing on a non-zero status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailure`] when the exit code is not
    /// zero or missing.
    pub fn into_stdout(self, program: &str) -> Result<Vec<u8>, TransportError> {
        if self.is_success() {
            return Ok(self.stdout.into_bytes());
        }
        Err(TransportError::CommandFailure {
            program: program.to_owned(),
            status: self.code,
            status_text: self.status_text(),
            stderr: self.stderr,
        })
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError>;
}

/// Real command runner that shells out to the host operating system.
///
/// With a timeout set, a process still running when it expires is killed
/// and the call fails with [`TransportError::Timeout`].
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    timeout: Option<Duration>,
}

impl ProcessCommandRunner {
    /// Builds a runner that waits for every process to finish.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Builds a runner that gives up on processes running past `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError> {
        let spawn_error = |err: io::Error| TransportError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.timeout {
            None => child.wait().map_err(spawn_error)?,
            Some(limit) => wait_bounded(&mut child, program, limit)?,
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn drain<S: Read + Send + 'static>(stream: Option<S>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut handle) = stream {
            handle.read_to_end(&mut buf).ok();
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> String {
    let bytes = reader.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait_bounded(
    child: &mut Child,
    program: &str,
    limit: Duration,
) -> Result<ExitStatus, TransportError> {
    let deadline = Instant::now() + limit;
    loop {
        let polled = child.try_wait().map_err(|err| TransportError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;
        if let Some(status) = polled {
            return Ok(status);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            // Readers are left detached; a surviving grandchild may hold the pipes.
            child.kill().ok();
            child.wait().ok();
            return Err(TransportError::Timeout {
                program: program.to_owned(),
                timeout: limit,
            });
        }
        thread::sleep(WAIT_POLL.min(remaining));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(script)]
    }

    #[test]
    fn unbounded_runner_captures_output_and_status() {
        let output = ProcessCommandRunner::new()
            .run("sh", &sh("printf out; printf err >&2; exit 3"))
            .expect("sh should start");

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
    }

    #[test]
    fn bounded_runner_returns_commands_that_finish_in_time() {
        let runner = ProcessCommandRunner::with_timeout(Some(Duration::from_secs(30)));

        let output = runner
            .run("sh", &sh("yes line | head -n 50000"))
            .expect("sh should start");

        assert!(output.is_success());
        assert_eq!(output.stdout.lines().count(), 50_000);
    }

    #[test]
    fn bounded_runner_kills_commands_that_never_return() {
        let limit = Duration::from_millis(200);
        let runner = ProcessCommandRunner::with_timeout(Some(limit));
        let started = Instant::now();

        let err = runner
            .run("sh", &sh("exec sleep 30"))
            .expect_err("sleep should outlive the limit");

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            err,
            TransportError::Timeout {
                program: String::from("sh"),
                timeout: limit,
            }
        );
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = ProcessCommandRunner::new()
            .run("aem-provision-no-such-program", &[])
            .expect_err("program does not exist");

        assert!(matches!(err, TransportError::Spawn { .. }), "{err}");
    }
}
