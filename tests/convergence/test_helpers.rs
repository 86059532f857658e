//! Shared fixtures for convergence BDD scenarios.

use std::time::Duration;

use aem_provision::test_support::{MockTransport, RecordingReporter};
use aem_provision::{
    ConnectionManager, InstanceError, InstanceModel, InstanceOrchestrator, InstanceScript,
    InstanceStatus, Operation, Transport,
};
use rstest::fixture;
use thiserror::Error;
use tokio::runtime::Runtime;

pub const SERVICE_NAME: &str = "aem-author";
pub const BOOTSTRAP_COMMAND: &str = "dnf install -y java-11";
pub const LOCK_MARKER: &str = "/tmp/aemc/provider/bootstrap.lock";
const STATUS_YAML: &str = "data:\n  instances:\n    - id: author\n    - id: publish\n";

#[derive(Debug, Error)]
pub enum StepError {
    #[error("cannot start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[derive(Clone, Debug)]
pub enum Outcome {
    Success(InstanceStatus),
    Failure {
        step: Option<String>,
        message: String,
    },
}

#[derive(Clone, Debug)]
pub struct ConvergenceContext {
    pub machine: MockTransport,
    pub model: InstanceModel,
    pub reporter: RecordingReporter,
    pub outcome: Option<Outcome>,
}

impl ConvergenceContext {
    fn new() -> Self {
        let mut model = InstanceModel::new("mock");
        model.system.bootstrap = InstanceScript::inline([BOOTSTRAP_COMMAND]);
        model.compose.config = String::from("instance:\n  config: {}\n");
        Self {
            machine: MockTransport::new()
                .with_user("aem")
                .responding("instance status", STATUS_YAML),
            model,
            reporter: RecordingReporter::new(),
            outcome: None,
        }
    }

    /// Runs `operation` to completion and records how it ended.
    pub fn run(mut self, operation: Operation) -> Result<Self, StepError> {
        let runtime = Runtime::new()?;
        let orchestrator = orchestrator_for(&self.machine);
        let model = self.model.clone();
        let reporter = self.reporter.clone();
        let result = runtime.block_on(async move {
            match operation {
                Operation::Create => orchestrator.create(&model, &reporter).await,
                Operation::Update => orchestrator.update(&model, &reporter).await,
                Operation::Delete => orchestrator
                    .delete(&model, &reporter)
                    .await
                    .map(|()| InstanceStatus::default()),
                Operation::Status => orchestrator.status(&model, &reporter).await,
            }
        });
        self.outcome = Some(match result {
            Ok(status) => Outcome::Success(status),
            Err(err) => Outcome::Failure {
                step: failed_step(&err),
                message: err.to_string(),
            },
        });
        Ok(self)
    }

    pub fn status(&self) -> Result<&InstanceStatus, StepError> {
        match &self.outcome {
            Some(Outcome::Success(status)) => Ok(status),
            Some(Outcome::Failure { message, .. }) => Err(StepError::Assertion(format!(
                "expected success, got failure: {message}"
            ))),
            None => Err(StepError::Assertion(String::from("no operation ran"))),
        }
    }
}

fn failed_step(err: &InstanceError) -> Option<String> {
    match err {
        InstanceError::Step { step, .. } => Some(step.to_string()),
        _ => None,
    }
}

fn orchestrator_for(machine: &MockTransport) -> InstanceOrchestrator {
    let shared = machine.clone();
    let mut connections =
        ConnectionManager::default().with_poll_interval(Duration::from_millis(5));
    connections.register("mock", move |_| {
        Ok(Box::new(shared.clone()) as Box<dyn Transport>)
    });
    InstanceOrchestrator::new(connections)
        .with_service_name(SERVICE_NAME)
        .with_action_timeout(Duration::from_secs(1))
        .with_state_timeout(Duration::from_secs(1))
}

#[fixture]
pub fn convergence() -> ConvergenceContext {
    ConvergenceContext::new()
}
