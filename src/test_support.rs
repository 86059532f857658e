//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;
use std::time::Duration;

use camino::Utf8Path;
use tokio::sync::{Mutex, MutexGuard};

use crate::report::ProgressReporter;
use crate::transport::{CommandOutput, CommandRunner, Invocation, Transport, TransportError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<Scripted>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

#[derive(Clone, Debug)]
enum Scripted {
    Output(CommandOutput),
    Timeout(Duration),
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .borrow_mut()
            .push_back(Scripted::Output(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            }));
    }

    /// Pushes a process that outlives `limit` and is killed.
    pub fn push_timeout(&self, limit: Duration) {
        self.responses.borrow_mut().push_back(Scripted::Timeout(limit));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        match self.responses.borrow_mut().pop_front() {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Timeout(timeout)) => Err(TransportError::Timeout {
                program: program.to_owned(),
                timeout,
            }),
            None => Err(TransportError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            }),
        }
    }
}

/// One operation observed by [`MockTransport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MockCall {
    /// A connection attempt.
    Connect,
    /// A disconnect.
    Disconnect,
    /// A command or script body.
    Command {
        /// Command text.
        command: String,
        /// Working directory.
        dir: String,
        /// Whether privilege escalation was requested.
        sudo: bool,
        /// Environment exported for the command.
        env: BTreeMap<String, String>,
    },
    /// An existence probe.
    Exists {
        /// Probed path.
        path: String,
        /// Whether privilege escalation was requested.
        sudo: bool,
    },
    /// A file write.
    Write {
        /// Written path.
        path: String,
        /// Whether privilege escalation was requested.
        sudo: bool,
    },
    /// A directory creation.
    EnsureDir {
        /// Created path.
        path: String,
        /// Whether privilege escalation was requested.
        sudo: bool,
    },
    /// A recursive removal.
    Delete {
        /// Removed path.
        path: String,
        /// Whether privilege escalation was requested.
        sudo: bool,
    },
    /// A local-to-remote copy.
    Copy {
        /// Local source.
        local: String,
        /// Remote destination.
        remote: String,
        /// Whether the copy was recursive.
        recursive: bool,
    },
}

impl MockCall {
    /// Compact label used for sequence assertions, for example
    /// `run+sudo: systemctl start aem.service` or `write: /data/aem.yml`.
    #[must_use]
    pub fn label(&self) -> String {
        let marker = |sudo: &bool| if *sudo { "+sudo" } else { "" };
        match self {
            Self::Connect => String::from("connect"),
            Self::Disconnect => String::from("disconnect"),
            Self::Command { command, sudo, .. } => format!("run{}: {command}", marker(sudo)),
            Self::Exists { path, sudo } => format!("exists{}: {path}", marker(sudo)),
            Self::Write { path, sudo } => format!("write{}: {path}", marker(sudo)),
            Self::EnsureDir { path, sudo } => format!("mkdir{}: {path}", marker(sudo)),
            Self::Delete { path, sudo } => format!("delete{}: {path}", marker(sudo)),
            Self::Copy { local, remote, .. } => format!("copy: {local} -> {remote}"),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    user: Option<String>,
    connect_failures: Option<usize>,
    connect_attempts: usize,
    fail_disconnect: bool,
    command_failures: Vec<(String, i32)>,
    hung_commands: Vec<(String, Duration)>,
    write_failures: Vec<String>,
    responses: Vec<(String, String)>,
    files: BTreeMap<String, Vec<u8>>,
    calls: Vec<MockCall>,
}

/// In-memory transport double.
///
/// Clones share state, so a test keeps one handle for assertions while the
/// code under test owns another. Commands succeed with empty output unless a
/// failure or canned response matches their text; file operations act on an
/// in-memory filesystem.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    /// Creates a reachable double with an empty filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user reported by [`Transport::user`].
    #[must_use]
    pub fn with_user(self, user: &str) -> Self {
        self.state.borrow_mut().user = Some(user.to_owned());
        self
    }

    /// Makes the first `attempts` connection attempts fail.
    #[must_use]
    pub fn failing_connects(self, attempts: usize) -> Self {
        self.state.borrow_mut().connect_failures = Some(attempts);
        self
    }

    /// Makes every connection attempt fail.
    #[must_use]
    pub fn unreachable(self) -> Self {
        self.state.borrow_mut().connect_failures = Some(usize::MAX);
        self
    }

    /// Makes disconnect fail.
    #[must_use]
    pub fn failing_disconnect(self) -> Self {
        self.state.borrow_mut().fail_disconnect = true;
        self
    }

    /// Makes every command containing `needle` exit with `code`.
    #[must_use]
    pub fn failing_command(self, needle: &str, code: i32) -> Self {
        self.state
            .borrow_mut()
            .command_failures
            .push((needle.to_owned(), code));
        self
    }

    /// Makes every command containing `needle` run past `limit` and time out.
    #[must_use]
    pub fn hanging_command(self, needle: &str, limit: Duration) -> Self {
        self.state
            .borrow_mut()
            .hung_commands
            .push((needle.to_owned(), limit));
        self
    }

    /// Makes every write to a path containing `needle` fail.
    #[must_use]
    pub fn failing_write(self, needle: &str) -> Self {
        self.state.borrow_mut().write_failures.push(needle.to_owned());
        self
    }

    /// Answers commands containing `needle` with `stdout`.
    #[must_use]
    pub fn responding(self, needle: &str, stdout: &str) -> Self {
        self.state
            .borrow_mut()
            .responses
            .push((needle.to_owned(), stdout.to_owned()));
        self
    }

    /// Seeds a file in the in-memory filesystem.
    #[must_use]
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.state
            .borrow_mut()
            .files
            .insert(path.to_owned(), content.as_bytes().to_vec());
        self
    }

    /// Removes any previously registered command failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.borrow_mut();
        state.command_failures.clear();
        state.hung_commands.clear();
        state.write_failures.clear();
    }

    /// Returns every call observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.borrow().calls.clone()
    }

    /// Returns [`MockCall::label`] for every call observed so far.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.state.borrow().calls.iter().map(MockCall::label).collect()
    }

    /// Counts observed calls whose label contains `needle`.
    #[must_use]
    pub fn count(&self, needle: &str) -> usize {
        self.labels()
            .iter()
            .filter(|label| label.contains(needle))
            .count()
    }

    /// Number of connection attempts made.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.borrow().connect_attempts
    }

    /// Returns the content stored at `path`, if any.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        self.state
            .borrow()
            .files
            .get(path)
            .map(|content| String::from_utf8_lossy(content).into_owned())
    }

    /// Forgets the call journal while keeping files and failure rules.
    pub fn reset_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    fn record(&self, call: MockCall) {
        self.state.borrow_mut().calls.push(call);
    }

    fn write_failure(&self, path: &str) -> Option<TransportError> {
        let state = self.state.borrow();
        state
            .write_failures
            .iter()
            .any(|needle| path.contains(needle.as_str()))
            .then(|| TransportError::CommandFailure {
                program: String::from("mock"),
                status: Some(1),
                status_text: String::from("1"),
                stderr: format!("simulated write failure for {path}"),
            })
    }
}

impl Transport for MockTransport {
    fn describe(&self) -> String {
        String::from("mock")
    }

    fn user(&self) -> Option<String> {
        self.state.borrow().user.clone()
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        self.record(MockCall::Connect);
        let mut state = self.state.borrow_mut();
        state.connect_attempts += 1;
        match state.connect_failures {
            Some(remaining) if remaining > 0 => {
                if remaining != usize::MAX {
                    state.connect_failures = Some(remaining - 1);
                }
                Err(TransportError::Unreachable {
                    target: String::from("mock"),
                    message: format!("attempt {} refused", state.connect_attempts),
                })
            }
            _ => Ok(()),
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(MockCall::Disconnect);
        if self.state.borrow().fail_disconnect {
            return Err(TransportError::Unreachable {
                target: String::from("mock"),
                message: String::from("connection already reset"),
            });
        }
        Ok(())
    }

    fn execute(&self, invocation: &Invocation<'_>) -> Result<CommandOutput, TransportError> {
        self.record(MockCall::Command {
            command: invocation.command.to_owned(),
            dir: invocation.dir.to_owned(),
            sudo: invocation.sudo,
            env: invocation.env.clone(),
        });
        let state = self.state.borrow();
        if let Some((_, limit)) = state
            .hung_commands
            .iter()
            .find(|(needle, _)| invocation.command.contains(needle.as_str()))
        {
            return Err(TransportError::Timeout {
                program: String::from("mock"),
                timeout: *limit,
            });
        }
        if let Some((_, code)) = state
            .command_failures
            .iter()
            .find(|(needle, _)| invocation.command.contains(needle.as_str()))
        {
            return Ok(CommandOutput {
                code: Some(*code),
                stdout: String::new(),
                stderr: format!("simulated failure of '{}'", invocation.command),
            });
        }
        let stdout = state
            .responses
            .iter()
            .find(|(needle, _)| invocation.command.contains(needle.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        Ok(CommandOutput::success(stdout))
    }

    fn copy_path(
        &self,
        local: &Utf8Path,
        remote: &str,
        recursive: bool,
    ) -> Result<(), TransportError> {
        self.record(MockCall::Copy {
            local: local.to_string(),
            remote: remote.to_owned(),
            recursive,
        });
        self.write_failure(remote).map_or(Ok(()), Err)
    }

    fn file_exists(
        &self,
        path: &str,
        _env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<bool, TransportError> {
        self.record(MockCall::Exists {
            path: path.to_owned(),
            sudo,
        });
        let state = self.state.borrow();
        let nested = format!("{}/", path.trim_end_matches('/'));
        Ok(state
            .files
            .keys()
            .any(|key| key == path || key.starts_with(&nested)))
    }

    fn write_file(
        &self,
        path: &str,
        content: &[u8],
        _env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<(), TransportError> {
        self.record(MockCall::Write {
            path: path.to_owned(),
            sudo,
        });
        if let Some(err) = self.write_failure(path) {
            return Err(err);
        }
        self.state
            .borrow_mut()
            .files
            .insert(path.to_owned(), content.to_vec());
        Ok(())
    }

    fn ensure_dir(
        &self,
        path: &str,
        _env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<(), TransportError> {
        self.record(MockCall::EnsureDir {
            path: path.to_owned(),
            sudo,
        });
        self.write_failure(path).map_or(Ok(()), Err)
    }

    fn delete_path(
        &self,
        path: &str,
        _env: &BTreeMap<String, String>,
        sudo: bool,
    ) -> Result<(), TransportError> {
        self.record(MockCall::Delete {
            path: path.to_owned(),
            sudo,
        });
        if let Some(err) = self.write_failure(path) {
            return Err(err);
        }
        let nested = format!("{}/", path.trim_end_matches('/'));
        self.state
            .borrow_mut()
            .files
            .retain(|key, _| key != path && !key.starts_with(&nested));
        Ok(())
    }
}

/// Reporter capturing every narrative line, prefixed by its kind.
#[derive(Clone, Debug, Default)]
pub struct RecordingReporter {
    lines: Rc<RefCell<Vec<String>>>,
}

impl RecordingReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every captured line.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    /// Returns only the warning lines, without their prefix.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter_map(|line| line.strip_prefix("warn: ").map(str::to_owned))
            .collect()
    }

    /// Reports whether any captured line contains `needle`.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|line| line.contains(needle))
    }

    fn push(&self, line: String) {
        self.lines.borrow_mut().push(line);
    }
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.push(format!("step: {message}"));
    }

    fn success(&self, message: &str) {
        self.push(format!("ok: {message}"));
    }

    fn warn(&self, message: &str) {
        self.push(format!("warn: {message}"));
    }

    fn output(&self, label: &str, text: &str) {
        self.push(format!("output[{label}]: {}", text.trim_end()));
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
