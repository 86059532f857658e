//! BDD scenarios for machine convergence.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ConvergenceContext, convergence};

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Create provisions the machine and reports the instances"
)]
fn scenario_create(convergence: ConvergenceContext) {
    drop(convergence);
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Update re-applies configuration without one-time steps"
)]
fn scenario_update(convergence: ConvergenceContext) {
    drop(convergence);
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Delete stops the service and removes the data directory"
)]
fn scenario_delete(convergence: ConvergenceContext) {
    drop(convergence);
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Bootstrap runs once across repeated creates"
)]
fn scenario_bootstrap_once(convergence: ConvergenceContext) {
    drop(convergence);
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Failed bootstrap leaves no lock marker"
)]
fn scenario_failed_bootstrap(convergence: ConvergenceContext) {
    drop(convergence);
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Create after a failed bootstrap runs it again"
)]
fn scenario_bootstrap_retried(convergence: ConvergenceContext) {
    drop(convergence);
}
