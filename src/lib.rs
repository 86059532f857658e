//! Core library for the `aem-provision` tool.
//!
//! The crate converges a remote machine into a running AEM Compose
//! deployment. A pluggable [`Transport`] reaches the machine (SSH, AWS SSM, or
//! the local shell), a [`RemoteClient`] layers environment, directories, and
//! scoped privilege on top of it, and the [`InstanceOrchestrator`] runs the
//! create, update, and delete sequences against an [`InstanceModel`].

pub mod client;
pub mod config;
pub mod connection;
pub mod instance;
pub mod lock;
pub mod model;
pub mod report;
pub mod status;
pub mod test_support;
pub mod transport;

pub use client::{ClientError, Privileged, RemoteClient};
pub use config::{ConfigError, ProvisionConfig};
pub use connection::{ConnectionManager, ConnectionSpec, TransportFactory};
pub use instance::{InstanceError, InstanceOrchestrator, Operation, Step, StepError};
pub use lock::{LockError, LockMarker, LockOutcome};
pub use model::{ClientModel, ComposeModel, InstanceModel, InstanceScript, ModelError, SystemModel};
pub use report::{ProgressReporter, TracingReporter};
pub use status::{InstanceDescriptor, InstanceStatus, StatusError};
pub use transport::{
    CommandOutput, CommandRunner, ProcessCommandRunner, Settings, Transport, TransportError,
    TransportKind, TransportPrograms,
};
