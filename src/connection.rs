//! Backend selection and the connect-with-retry protocol.
//!
//! Freshly created machines and cloud agents take a variable amount of time
//! to become reachable. [`ConnectionManager::connect`] therefore polls the
//! backend's `connect` at a constant interval until it succeeds or the
//! caller's time budget runs out.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::client::{ClientError, RemoteClient};
use crate::transport::{
    self, Settings, Transport, TransportError, TransportKind, TransportPrograms,
};

/// Default delay between connection attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Backend setting holding the per-attempt connect limit in seconds.
pub const CONNECT_TIMEOUT_KEY: &str = "connect_timeout";

/// Constructor for a custom backend registered under a type name.
pub type TransportFactory = Box<dyn Fn(&Settings) -> Result<Box<dyn Transport>, TransportError>>;

/// Declared connection: backend type name plus its settings and credentials.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectionSpec {
    /// Backend type discriminator, for example `ssh`.
    pub kind: String,
    /// Explicit backend settings.
    pub settings: BTreeMap<String, String>,
    /// Secret settings; explicit settings win on key collision.
    pub credentials: BTreeMap<String, String>,
    /// Limit on a single connection attempt, passed to the backend as its
    /// `connect_timeout` setting unless one is declared there.
    pub connect_timeout: Option<Duration>,
    /// Limit on every process the backend starts.
    pub read_timeout: Option<Duration>,
}

impl ConnectionSpec {
    /// Creates a spec for `kind` with no settings.
    #[must_use]
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            ..Self::default()
        }
    }

    /// Single parameter bag handed to the backend.
    #[must_use]
    pub fn merged_settings(&self) -> Settings {
        let settings = Settings::merged(&self.credentials, &self.settings);
        match self.connect_timeout {
            Some(limit) => {
                settings.or_insert(CONNECT_TIMEOUT_KEY, whole_seconds(limit).to_string())
            }
            None => settings,
        }
    }
}

/// Rounds up to whole seconds, never below one.
fn whole_seconds(limit: Duration) -> u64 {
    let secs = limit.as_secs() + u64::from(limit.subsec_nanos() > 0);
    secs.max(1)
}

/// Factory for connected [`RemoteClient`]s.
///
/// Holds no per-connection state; one manager may serve any number of
/// independent operations.
pub struct ConnectionManager {
    programs: TransportPrograms,
    poll_interval: Duration,
    factories: BTreeMap<String, TransportFactory>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("programs", &self.programs)
            .field("poll_interval", &self.poll_interval)
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(TransportPrograms::default())
    }
}

impl ConnectionManager {
    /// Creates a manager for the built-in backends.
    #[must_use]
    pub fn new(programs: TransportPrograms) -> Self {
        Self {
            programs,
            poll_interval: DEFAULT_POLL_INTERVAL,
            factories: BTreeMap::new(),
        }
    }

    /// Overrides the delay between connection attempts.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Delay between connection attempts.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Registers a custom backend under `kind`, shadowing any built-in one.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&Settings) -> Result<Box<dyn Transport>, TransportError> + 'static,
    {
        self.factories.insert(kind.to_owned(), Box::new(factory));
    }

    /// Builds the backend declared by `spec` without connecting it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Backend`] wrapping
    /// [`TransportError::UnsupportedTransport`] for unknown type names, or
    /// [`TransportError::InvalidSettings`] when required settings are missing.
    pub fn make(&self, spec: &ConnectionSpec) -> Result<Box<dyn Transport>, ClientError> {
        let settings = spec.merged_settings();
        let built = match self.factories.get(spec.kind.trim()) {
            Some(factory) => factory(&settings),
            None => spec
                .kind
                .parse::<TransportKind>()
                .and_then(|kind| {
                    transport::build(kind, &settings, &self.programs, spec.read_timeout)
                }),
        };
        built.map_err(|source| ClientError::Backend {
            kind: spec.kind.clone(),
            source,
        })
    }

    /// Builds the backend and connects it, retrying until `budget` elapses.
    ///
    /// The final wait is clipped to the time left, so one last attempt is
    /// always made at the deadline.
    ///
    /// `on_attempt` is called after every failed attempt that will be
    /// retried, with the attempt number and its error.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Backend`] when the backend cannot be built and
    /// [`ClientError::Connection`] carrying the last failure when the budget
    /// is exhausted.
    pub async fn connect<F>(
        &self,
        spec: &ConnectionSpec,
        budget: Duration,
        mut on_attempt: F,
    ) -> Result<RemoteClient, ClientError>
    where
        F: FnMut(usize, &TransportError),
    {
        let mut backend = self.make(spec)?;
        let target = backend.describe();
        let started = Instant::now();
        let deadline = started + budget;
        let mut attempts = 0_usize;

        loop {
            attempts += 1;
            match backend.connect() {
                Ok(()) => {
                    info!(%target, attempts, "connected");
                    return Ok(RemoteClient::connected(backend, &spec.kind));
                }
                Err(err) => {
                    debug!(%target, attempts, error = %err, "connection attempt failed");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ClientError::Connection {
                            kind: spec.kind.clone(),
                            attempts,
                            elapsed: started.elapsed(),
                            source: err,
                        });
                    }
                    on_attempt(attempts, &err);
                    sleep(self.poll_interval.min(remaining)).await;
                }
            }
        }
    }
}
