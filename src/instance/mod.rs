//! Lifecycle orchestration for application instances on one machine.
//!
//! Create and Update share one step sequence; Update skips the lock-guarded
//! bootstrap and the create script so that it only repeats idempotent work.
//! A failing step aborts the rest of the sequence without rolling back the
//! steps that already ran. Re-invoking Update or Delete continues from the
//! partially converged state.
//!
//! The connection is released when the operation ends, whatever the outcome;
//! a failed disconnect is reported as a warning and never replaces the
//! operation's own result.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ClientError, RemoteClient};
use crate::config::ProvisionConfig;
use crate::connection::ConnectionManager;
use crate::lock::LockError;
use crate::model::{InstanceModel, ModelError};
use crate::report::ProgressReporter;
use crate::status::{self, InstanceStatus, StatusError};

pub mod service;
pub mod steps;

/// Default connect budget for Create and Update.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(600);
/// Default connect budget for Delete and status reads.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(300);
/// Default host service name.
pub const DEFAULT_SERVICE_NAME: &str = "aem";

/// Lifecycle operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// First convergence.
    Create,
    /// Subsequent convergence.
    Update,
    /// Teardown.
    Delete,
    /// Read-only state query.
    Status,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Status => "status",
        })
    }
}

/// Steps of the lifecycle sequences, in Create order followed by teardown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Lock-guarded one-time machine preparation.
    Bootstrap,
    /// Staging of declared files.
    CopyFiles,
    /// Working directory creation.
    PrepareWorkDir,
    /// Data directory creation.
    PrepareDataDir,
    /// Execution tool download.
    InstallTool,
    /// Configuration payload write.
    WriteConfig,
    /// The declared create script.
    CreateScript,
    /// Service unit write and enable.
    ConfigureService,
    /// Environment profile fragment write.
    SaveEnvProfile,
    /// Service start.
    StartService,
    /// Configuration apply through the execution tool.
    ApplyConfig,
    /// The declared configure script.
    ConfigureScript,
    /// Service stop.
    StopService,
    /// The declared delete script.
    DeleteScript,
    /// Data directory removal.
    DeleteDataDir,
}

impl Step {
    /// Steps run by Create.
    pub const CREATE: [Self; 12] = [
        Self::Bootstrap,
        Self::CopyFiles,
        Self::PrepareWorkDir,
        Self::PrepareDataDir,
        Self::InstallTool,
        Self::WriteConfig,
        Self::CreateScript,
        Self::ConfigureService,
        Self::SaveEnvProfile,
        Self::StartService,
        Self::ApplyConfig,
        Self::ConfigureScript,
    ];

    /// Steps run by Update.
    pub const UPDATE: [Self; 10] = [
        Self::CopyFiles,
        Self::PrepareWorkDir,
        Self::PrepareDataDir,
        Self::InstallTool,
        Self::WriteConfig,
        Self::ConfigureService,
        Self::SaveEnvProfile,
        Self::StartService,
        Self::ApplyConfig,
        Self::ConfigureScript,
    ];

    /// Steps run by Delete.
    pub const DELETE: [Self; 3] = [Self::StopService, Self::DeleteScript, Self::DeleteDataDir];

    /// Short name used in errors and the progress narrative.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap machine",
            Self::CopyFiles => "copy files",
            Self::PrepareWorkDir => "prepare work directory",
            Self::PrepareDataDir => "prepare data directory",
            Self::InstallTool => "install tool wrapper",
            Self::WriteConfig => "write configuration file",
            Self::CreateScript => "run create script",
            Self::ConfigureService => "configure system service",
            Self::SaveEnvProfile => "save environment profile",
            Self::StartService => "start system service",
            Self::ApplyConfig => "apply instance configuration",
            Self::ConfigureScript => "run configure script",
            Self::StopService => "stop system service",
            Self::DeleteScript => "run delete script",
            Self::DeleteDataDir => "delete data directory",
        }
    }

    fn run(self, ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
        match self {
            Self::Bootstrap => steps::bootstrap(ctx),
            Self::CopyFiles => steps::copy_files(ctx),
            Self::PrepareWorkDir => steps::prepare_work_dir(ctx),
            Self::PrepareDataDir => steps::prepare_data_dir(ctx),
            Self::InstallTool => steps::install_tool(ctx),
            Self::WriteConfig => steps::write_config(ctx),
            Self::CreateScript => steps::create_script(ctx),
            Self::ConfigureService => steps::configure_service(ctx),
            Self::SaveEnvProfile => steps::save_env_profile(ctx),
            Self::StartService => steps::start_service(ctx),
            Self::ApplyConfig => steps::apply_config(ctx),
            Self::ConfigureScript => steps::configure_script(ctx),
            Self::StopService => steps::stop_service(ctx),
            Self::DeleteScript => steps::delete_script(ctx),
            Self::DeleteDataDir => steps::delete_data_dir(ctx),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure of a single lifecycle step.
#[derive(Debug, Error)]
pub enum StepError {
    /// A command or file operation failed.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// The lock-guarded bootstrap failed or its marker was inaccessible.
    #[error(transparent)]
    Lock(Box<LockError<ClientError>>),
    /// The service unit template could not be rendered.
    #[error("cannot render service unit template: {message}")]
    ConfigTemplate {
        /// Template engine diagnostic.
        message: String,
    },
}

impl From<LockError<ClientError>> for StepError {
    fn from(err: LockError<ClientError>) -> Self {
        Self::Lock(Box::new(err))
    }
}

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Raised when the model fails validation.
    #[error("invalid instance model: {0}")]
    Model(#[from] ModelError),
    /// Raised when the machine cannot be reached within the budget.
    #[error("unable to connect to instance machine: {0}")]
    Connect(#[source] ClientError),
    /// Raised when a lifecycle step fails; later steps did not run.
    #[error("unable to {step}: {source}")]
    Step {
        /// Step that failed.
        step: Step,
        /// Underlying failure.
        #[source]
        source: StepError,
    },
    /// Raised when the final status read fails.
    #[error("unable to read instance status: {0}")]
    Status(#[from] StatusError),
}

/// Everything a step needs, passed explicitly.
pub struct InstanceContext<'a> {
    /// Connected client.
    pub client: &'a mut RemoteClient,
    /// Progress narrative sink.
    pub reporter: &'a dyn ProgressReporter,
    /// Input model of the operation.
    pub model: &'a InstanceModel,
    /// Host service name.
    pub service_name: &'a str,
}

impl InstanceContext<'_> {
    /// Runs `sequence` in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Step`] naming the failed step.
    pub fn run_steps(&mut self, sequence: &[Step]) -> Result<(), InstanceError> {
        let reporter = self.reporter;
        for step in sequence.iter().copied() {
            reporter.step(&format!("Started: {step}"));
            step.run(self).map_err(|source| {
                reporter.warn(&format!("Failed: {step}: {source}"));
                InstanceError::Step { step, source }
            })?;
            reporter.success(&format!("Finished: {step}"));
        }
        Ok(())
    }
}

/// Connected client released when dropped.
struct Session<'r> {
    client: RemoteClient,
    reporter: &'r dyn ProgressReporter,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.client.disconnect() {
            warn!(error = %err, "disconnect failed");
            self.reporter
                .warn(&format!("Unable to disconnect from instance machine: {err}"));
        }
    }
}

/// Runs Create, Update, Delete, and status reads against one machine.
#[derive(Debug)]
pub struct InstanceOrchestrator {
    connections: ConnectionManager,
    service_name: String,
    action_timeout: Duration,
    state_timeout: Duration,
}

impl InstanceOrchestrator {
    /// Creates an orchestrator with default budgets and service name.
    #[must_use]
    pub fn new(connections: ConnectionManager) -> Self {
        Self {
            connections,
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            state_timeout: DEFAULT_STATE_TIMEOUT,
        }
    }

    /// Creates an orchestrator from process configuration.
    #[must_use]
    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self {
            connections: config.connection_manager(),
            service_name: config.service_name.clone(),
            action_timeout: config.action_timeout(),
            state_timeout: config.state_timeout(),
        }
    }

    /// Overrides the host service name.
    #[must_use]
    pub fn with_service_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.service_name);
        self
    }

    /// Overrides the default connect budget for Create and Update.
    #[must_use]
    pub const fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Overrides the default connect budget for Delete and status reads.
    #[must_use]
    pub const fn with_state_timeout(mut self, timeout: Duration) -> Self {
        self.state_timeout = timeout;
        self
    }

    /// Connection manager used to reach machines.
    pub const fn connections_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    /// First convergence: bootstrap, stage, configure, create, launch.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] for the first failing step, a connection
    /// failure, or a status read failure.
    pub async fn create(
        &self,
        model: &InstanceModel,
        reporter: &dyn ProgressReporter,
    ) -> Result<InstanceStatus, InstanceError> {
        self.converge(Operation::Create, &Step::CREATE, model, reporter)
            .await
    }

    /// Subsequent convergence; skips bootstrap and the create script.
    ///
    /// # Errors
    ///
    /// Same as [`InstanceOrchestrator::create`].
    pub async fn update(
        &self,
        model: &InstanceModel,
        reporter: &dyn ProgressReporter,
    ) -> Result<InstanceStatus, InstanceError> {
        self.converge(Operation::Update, &Step::UPDATE, model, reporter)
            .await
    }

    /// Stops the service, runs the delete script, and removes the data
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] for a connection failure or the first
    /// failing step.
    pub async fn delete(
        &self,
        model: &InstanceModel,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), InstanceError> {
        reporter.step("Started deleting instance resource");
        let mut session = self.open(Operation::Delete, model, reporter).await?;
        let mut ctx = InstanceContext {
            client: &mut session.client,
            reporter,
            model,
            service_name: &self.service_name,
        };
        ctx.run_steps(&Step::DELETE)?;
        reporter.success("Finished deleting instance resource");
        Ok(())
    }

    /// Reads instance status without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] for a connection or status read failure.
    pub async fn status(
        &self,
        model: &InstanceModel,
        reporter: &dyn ProgressReporter,
    ) -> Result<InstanceStatus, InstanceError> {
        let session = self.open(Operation::Status, model, reporter).await?;
        Ok(status::read_status(&session.client)?)
    }

    async fn converge(
        &self,
        operation: Operation,
        sequence: &[Step],
        model: &InstanceModel,
        reporter: &dyn ProgressReporter,
    ) -> Result<InstanceStatus, InstanceError> {
        reporter.step(&format!("Started setting up instance resource ({operation})"));
        let mut session = self.open(operation, model, reporter).await?;
        let mut ctx = InstanceContext {
            client: &mut session.client,
            reporter,
            model,
            service_name: &self.service_name,
        };
        ctx.run_steps(sequence)?;
        reporter.success(&format!("Finished setting up instance resource ({operation})"));

        Ok(status::read_status(&session.client)?)
    }

    async fn open<'r>(
        &self,
        operation: Operation,
        model: &InstanceModel,
        reporter: &'r dyn ProgressReporter,
    ) -> Result<Session<'r>, InstanceError> {
        model.validate()?;
        let budget = match operation {
            Operation::Create | Operation::Update => model
                .client
                .action_timeout()?
                .unwrap_or(self.action_timeout),
            Operation::Delete | Operation::Status => model
                .client
                .state_timeout()?
                .unwrap_or(self.state_timeout),
        };
        let spec = model.client.connection_spec()?;
        reporter.step(&format!(
            "Connecting to instance machine using {}",
            spec.kind
        ));

        let mut client = self
            .connections
            .connect(&spec, budget, |attempt, err| {
                reporter.step(&format!(
                    "Awaiting connection to instance machine (attempt {attempt}): {err}"
                ));
            })
            .await
            .map_err(InstanceError::Connect)?;

        client.set_env("AEM_CLI_VERSION", &model.compose.version);
        client.set_env("AEM_OUTPUT_LOG_MODE", "both");
        client.set_work_dir(&model.system.work_dir);
        client.set_data_dir(&model.system.data_dir);

        let target = client.describe();
        info!(%operation, %target, "connected to instance machine");
        reporter.success(&format!("Connected to instance machine using {target}"));
        Ok(Session { client, reporter })
    }
}
