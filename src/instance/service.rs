//! Host service unit handling.

use std::error::Error as _;

use tera::{Context, Tera};

use crate::client::{ClientError, RemoteClient};
use crate::report::ProgressReporter;

/// Directory holding systemd unit files on the target.
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// Path of the unit file for `service_name`.
#[must_use]
pub fn unit_path(service_name: &str) -> String {
    format!("{UNIT_DIR}/{service_name}.service")
}

/// Renders the unit template with the `DATA_DIR` and `USER` variables.
///
/// # Errors
///
/// Returns the template engine diagnostic, including its cause chain, when
/// the template does not parse or references an unknown variable.
pub fn render_unit(template: &str, data_dir: &str, user: &str) -> Result<String, String> {
    let mut context = Context::new();
    context.insert("DATA_DIR", data_dir);
    context.insert("USER", user);
    Tera::one_off(template, &context, false).map_err(|err| error_chain(&err))
}

/// Runs `systemctl <action> <service_name>.service` with elevated privileges.
///
/// # Errors
///
/// Returns [`ClientError::Command`] when systemctl fails.
pub fn service_action(
    client: &mut RemoteClient,
    reporter: &dyn ProgressReporter,
    service_name: &str,
    action: &str,
) -> Result<(), ClientError> {
    let command = format!("systemctl {action} {service_name}.service");
    let output = client.privileged().run_shell_command(&command, ".")?;
    reporter.output(&command, &String::from_utf8_lossy(&output));
    Ok(())
}

fn error_chain(err: &tera::Error) -> String {
    let mut details = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        details.push(cause.to_string());
        source = cause.source();
    }
    details.join(": ")
}
