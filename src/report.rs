//! Human-readable progress narrative for lifecycle operations.
//!
//! Orchestration steps report through a [`ProgressReporter`] rather than
//! logging directly so that tests can assert on the narrative and callers can
//! route it wherever their operators look.

use tracing::{info, warn};

/// Sink for the one-line-per-step progress narrative.
pub trait ProgressReporter {
    /// Announces the start of a step or sub-step.
    fn step(&self, message: &str);

    /// Announces successful completion of a step.
    fn success(&self, message: &str);

    /// Reports a non-fatal problem.
    fn warn(&self, message: &str);

    /// Relays command output captured for the named command.
    fn output(&self, label: &str, text: &str);
}

/// Reporter forwarding every line to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn step(&self, message: &str) {
        info!(target: "aem_provision::progress", "{message}");
    }

    fn success(&self, message: &str) {
        info!(target: "aem_provision::progress", outcome = "ok", "{message}");
    }

    fn warn(&self, message: &str) {
        warn!(target: "aem_provision::progress", "{message}");
    }

    fn output(&self, label: &str, text: &str) {
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            info!(target: "aem_provision::output", command = label, "{line}");
        }
    }
}
