//! BDD step definitions for create, update, and delete convergence.

use aem_provision::Operation;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{
    BOOTSTRAP_COMMAND, ConvergenceContext, LOCK_MARKER, Outcome, SERVICE_NAME, StepError,
};

#[given("a reachable machine with a bootstrap script")]
fn reachable_machine(convergence: ConvergenceContext) -> ConvergenceContext {
    convergence
}

#[given("the deployment was created")]
fn deployment_created(convergence: ConvergenceContext) -> Result<ConvergenceContext, StepError> {
    let created = convergence.run(Operation::Create)?;
    created.status()?;
    Ok(created)
}

#[given("the bootstrap fails with exit code \"{code}\"")]
fn bootstrap_fails(convergence: ConvergenceContext, code: i32) -> ConvergenceContext {
    ConvergenceContext {
        machine: convergence.machine.failing_command(BOOTSTRAP_COMMAND, code),
        ..convergence
    }
}

#[given("a create attempt failed during bootstrap")]
fn create_failed_during_bootstrap(
    convergence: ConvergenceContext,
) -> Result<ConvergenceContext, StepError> {
    let failing = ConvergenceContext {
        machine: convergence.machine.failing_command(BOOTSTRAP_COMMAND, 1),
        ..convergence
    };
    let attempted = failing.run(Operation::Create)?;
    if attempted.status().is_ok() {
        return Err(StepError::Assertion(String::from(
            "the first create should fail",
        )));
    }
    attempted.machine.clear_failures();
    Ok(attempted)
}

#[when("I create the deployment")]
fn create_deployment(convergence: ConvergenceContext) -> Result<ConvergenceContext, StepError> {
    convergence.run(Operation::Create)
}

#[when("I update the deployment")]
fn update_deployment(convergence: ConvergenceContext) -> Result<ConvergenceContext, StepError> {
    convergence.run(Operation::Update)
}

#[when("I delete the deployment")]
fn delete_deployment(convergence: ConvergenceContext) -> Result<ConvergenceContext, StepError> {
    convergence.run(Operation::Delete)
}

#[then("the operation succeeds")]
fn operation_succeeds(convergence: &ConvergenceContext) -> Result<(), StepError> {
    convergence.status().map(drop)
}

#[then("the operation fails at step \"{step}\"")]
fn operation_fails_at(convergence: &ConvergenceContext, step: String) -> Result<(), StepError> {
    match &convergence.outcome {
        Some(Outcome::Failure {
            step: Some(failed), ..
        }) if *failed == step => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure at '{step}', got {other:?}"
        ))),
    }
}

#[then("the status lists instances \"{ids}\"")]
fn status_lists_instances(convergence: &ConvergenceContext, ids: String) -> Result<(), StepError> {
    let listed: Vec<&str> = convergence
        .status()?
        .instances
        .iter()
        .map(|instance| instance.id.as_str())
        .collect();
    let expected: Vec<&str> = ids.split(',').collect();
    if listed == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected instances {expected:?}, got {listed:?}"
        )))
    }
}

#[then("the service unit and environment profile are installed")]
fn service_files_installed(convergence: &ConvergenceContext) -> Result<(), StepError> {
    let unit = format!("/etc/systemd/system/{SERVICE_NAME}.service");
    let profile = format!("/etc/profile.d/{SERVICE_NAME}.sh");
    let missing_file = [&unit, &profile]
        .into_iter()
        .find(|path| convergence.machine.file(path).is_none());
    match missing_file {
        Some(missing) => Err(StepError::Assertion(format!("{missing} was not written"))),
        None => Ok(()),
    }
}

#[then("the bootstrap script ran \"{count}\" times")]
fn bootstrap_ran(convergence: &ConvergenceContext, count: usize) -> Result<(), StepError> {
    expect_count(convergence, BOOTSTRAP_COMMAND, count)
}

#[then("the create script ran \"{count}\" times")]
fn create_script_ran(convergence: &ConvergenceContext, count: usize) -> Result<(), StepError> {
    expect_count(convergence, "sh aemw instance create", count)
}

#[then("the instance configuration was applied \"{count}\" times")]
fn configuration_applied(convergence: &ConvergenceContext, count: usize) -> Result<(), StepError> {
    expect_count(convergence, "sh aemw instance launch", count)
}

#[then("the service was stopped")]
fn service_stopped(convergence: &ConvergenceContext) -> Result<(), StepError> {
    expect_count(convergence, &format!("systemctl stop {SERVICE_NAME}.service"), 1)
}

#[then("the configuration file is gone")]
fn configuration_file_gone(convergence: &ConvergenceContext) -> Result<(), StepError> {
    let path = convergence.model.config_path();
    if convergence.machine.file(&path).is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{path} should be deleted")))
    }
}

#[then("every session was closed")]
fn sessions_closed(convergence: &ConvergenceContext) -> Result<(), StepError> {
    let opened = convergence.machine.connect_attempts();
    let closed = convergence.machine.count("disconnect");
    if opened == closed {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{opened} connection(s) opened but {closed} closed"
        )))
    }
}

#[then("the bootstrap lock marker exists")]
fn lock_marker_exists(convergence: &ConvergenceContext) -> Result<(), StepError> {
    if convergence.machine.file(LOCK_MARKER).is_some() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{LOCK_MARKER} should exist")))
    }
}

#[then("the bootstrap lock marker is absent")]
fn lock_marker_absent(convergence: &ConvergenceContext) -> Result<(), StepError> {
    if convergence.machine.file(LOCK_MARKER).is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{LOCK_MARKER} should not be written after a failed bootstrap"
        )))
    }
}

#[then("no directory was prepared")]
fn no_directory_prepared(convergence: &ConvergenceContext) -> Result<(), StepError> {
    expect_count(convergence, "mkdir", 0)
}

fn expect_count(
    convergence: &ConvergenceContext,
    needle: &str,
    expected: usize,
) -> Result<(), StepError> {
    let observed = convergence.machine.count(needle);
    if observed == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected '{needle}' {expected} time(s), observed {observed}"
        )))
    }
}
