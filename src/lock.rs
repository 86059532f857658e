//! At-most-once actions guarded by a marker file on the target.
//!
//! The marker lives at `<base_dir>/provider/<action>.lock`. Its existence is
//! the only idempotency signal; the timestamp inside is informational. The
//! marker is written after the action succeeds, so a failed action is retried
//! on the next convergence pass instead of being silently skipped.

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::info;

use crate::client::{ClientError, RemoteClient};
use crate::report::ProgressReporter;

/// Directory under the base directory holding lock markers.
pub const LOCK_DIR: &str = "provider";

/// Errors raised while running a lock-guarded action.
#[derive(Debug, Error)]
pub enum LockError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the marker cannot be probed or written.
    #[error("lock marker {path} is not accessible: {source}")]
    Marker {
        /// Marker path on the target.
        path: String,
        /// Underlying client failure.
        #[source]
        source: ClientError,
    },
    /// Raised when the guarded action fails; no marker is written.
    #[error("action '{action}' failed: {source}")]
    Action {
        /// Guarded action name.
        action: String,
        /// Failure reported by the action.
        #[source]
        source: E,
    },
}

/// Whether a guarded action ran or was skipped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockOutcome {
    /// The action ran and its marker was written.
    Performed,
    /// A marker was already present; the action did not run.
    Skipped,
}

/// Marker recording that an action has been performed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockMarker {
    action: String,
    path: String,
}

impl LockMarker {
    /// Derives the marker for `action` under `base_dir`.
    #[must_use]
    pub fn new(base_dir: &str, action: &str) -> Self {
        let base = base_dir.trim_end_matches('/');
        Self {
            action: action.to_owned(),
            path: format!("{base}/{LOCK_DIR}/{action}.lock"),
        }
    }

    /// Guarded action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Marker path on the target.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reports whether the marker exists on the target.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the probe fails.
    pub fn is_set(&self, client: &RemoteClient) -> Result<bool, ClientError> {
        client.file_exists(&self.path)
    }

    /// Writes the marker with the current UTC timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the write fails.
    pub fn set(&self, client: &RemoteClient) -> Result<(), ClientError> {
        let written_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        client.file_write(&self.path, format!("{written_at}\n").as_bytes())
    }
}

/// Runs `action` unless its marker under `base_dir` already exists.
///
/// # Errors
///
/// Returns [`LockError::Action`] when the action fails (the marker is left
/// absent) and [`LockError::Marker`] when the marker cannot be probed or
/// written.
pub fn do_once<E, F>(
    client: &mut RemoteClient,
    reporter: &dyn ProgressReporter,
    action: &str,
    base_dir: &str,
    run: F,
) -> Result<LockOutcome, LockError<E>>
where
    E: std::error::Error + 'static,
    F: FnOnce(&mut RemoteClient) -> Result<(), E>,
{
    let marker = LockMarker::new(base_dir, action);
    let marker_error = |source: ClientError| LockError::<E>::Marker {
        path: marker.path().to_owned(),
        source,
    };

    if marker.is_set(client).map_err(marker_error)? {
        reporter.step(&format!(
            "Skipping '{action}' as it was already performed (lock {})",
            marker.path()
        ));
        info!(action, lock = marker.path(), "lock present, skipping");
        return Ok(LockOutcome::Skipped);
    }

    run(client).map_err(|source| LockError::Action {
        action: action.to_owned(),
        source,
    })?;
    marker.set(client).map_err(marker_error)?;
    info!(action, lock = marker.path(), "lock written");
    Ok(LockOutcome::Performed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, ConnectionSpec};
    use crate::test_support::{MockTransport, RecordingReporter};
    use crate::transport::Transport;
    use rstest::rstest;
    use std::time::Duration;

    async fn connect(mock: &MockTransport) -> RemoteClient {
        let shared = mock.clone();
        let mut manager = ConnectionManager::default();
        manager.register("mock", move |_| Ok(Box::new(shared.clone()) as Box<dyn Transport>));
        manager
            .connect(&ConnectionSpec::new("mock"), Duration::from_secs(1), |_, _| {})
            .await
            .expect("mock connects")
    }

    #[rstest]
    #[case("/tmp/aemc", "bootstrap", "/tmp/aemc/provider/bootstrap.lock")]
    #[case("/tmp/aemc/", "bootstrap", "/tmp/aemc/provider/bootstrap.lock")]
    #[case("~/aemc", "disk-format", "~/aemc/provider/disk-format.lock")]
    fn marker_path_follows_convention(
        #[case] base: &str,
        #[case] action: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(LockMarker::new(base, action).path(), expected);
    }

    #[tokio::test]
    async fn guarded_action_runs_once() {
        let mock = MockTransport::new();
        let mut client = connect(&mock).await;
        let reporter = RecordingReporter::new();
        let mut runs = 0;

        for _ in 0..2 {
            do_once(&mut client, &reporter, "bootstrap", "/tmp/aemc", |_| {
                runs += 1;
                Ok::<(), ClientError>(())
            })
            .expect("guarded action should succeed");
        }

        assert_eq!(runs, 1);
        let written = mock
            .file("/tmp/aemc/provider/bootstrap.lock")
            .expect("marker should be written");
        assert!(
            chrono::DateTime::parse_from_rfc3339(written.trim()).is_ok(),
            "marker content: {written}"
        );
        assert!(reporter.mentions("Skipping 'bootstrap'"));
    }

    #[tokio::test]
    async fn failed_action_leaves_no_marker_and_is_retried() {
        let mock = MockTransport::new().failing_command("mkfs", 1);
        let mut client = connect(&mock).await;
        let reporter = RecordingReporter::new();
        let format_disk = |remote: &mut RemoteClient| {
            remote
                .privileged()
                .run_shell_command("mkfs.ext4 /dev/nvme1n1", ".")
                .map(drop)
        };

        let first = do_once(&mut client, &reporter, "bootstrap", "/tmp/aemc", format_disk);
        assert!(matches!(first, Err(LockError::Action { .. })));
        assert_eq!(mock.file("/tmp/aemc/provider/bootstrap.lock"), None);
        assert!(!client.is_privileged());

        mock.clear_failures();
        let second = do_once(&mut client, &reporter, "bootstrap", "/tmp/aemc", format_disk)
            .expect("retry should succeed");

        assert_eq!(second, LockOutcome::Performed);
        assert_eq!(mock.count("mkfs.ext4"), 2);
        assert!(mock.file("/tmp/aemc/provider/bootstrap.lock").is_some());
    }

    #[tokio::test]
    async fn marker_write_failure_is_reported_separately() {
        let mock = MockTransport::new().failing_write("provider/bootstrap.lock");
        let mut client = connect(&mock).await;

        let result = do_once(
            &mut client,
            &RecordingReporter::new(),
            "bootstrap",
            "/tmp/aemc",
            |_| Ok::<(), ClientError>(()),
        );

        assert!(matches!(
            result,
            Err(LockError::Marker { ref path, .. }) if path == "/tmp/aemc/provider/bootstrap.lock"
        ));
    }
}
