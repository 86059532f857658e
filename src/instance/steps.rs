//! Individual lifecycle steps.
//!
//! Each step is a plain function over [`InstanceContext`] so the orchestrator
//! can sequence them and tests can drive one at a time.

use camino::Utf8Path;

use crate::client::{ClientError, RemoteClient};
use crate::lock;
use crate::model::InstanceScript;
use crate::report::ProgressReporter;

use super::service;
use super::{InstanceContext, StepError};

/// Lock action name guarding the bootstrap script.
pub const BOOTSTRAP_ACTION: &str = "bootstrap";
/// Location the execution tool wrapper is downloaded from.
pub const TOOL_WRAPPER_URL: &str =
    "https://raw.githubusercontent.com/wttech/aemc/main/pkg/project/common/aemw";
/// Command applying the instance configuration.
pub const APPLY_CONFIG_COMMAND: &str = "sh aemw instance launch";

/// Runs inline commands in order, then the multi-line body.
///
/// The first failing inline command aborts the script.
///
/// # Errors
///
/// Returns [`ClientError::Command`] referencing the failing command.
pub fn run_script(
    client: &RemoteClient,
    reporter: &dyn ProgressReporter,
    name: &str,
    script: &InstanceScript,
    dir: &str,
) -> Result<(), ClientError> {
    if script.is_empty() {
        reporter.step(&format!("Script '{name}' declares nothing to run"));
        return Ok(());
    }

    let total = script.inline.len();
    for (index, command) in script.inline.iter().enumerate() {
        let position = index + 1;
        reporter.step(&format!(
            "Executing command '{command}' of script '{name}' ({position}/{total})"
        ));
        let output = client.run_shell_script(name, command, dir)?;
        reporter.output(command, &String::from_utf8_lossy(&output));
        reporter.success(&format!(
            "Executed command '{command}' of script '{name}' ({position}/{total})"
        ));
    }

    if !script.script.trim().is_empty() {
        reporter.step(&format!("Executing instance script '{name}'"));
        let output = client.run_shell_script(name, &script.script, dir)?;
        reporter.output(name, &String::from_utf8_lossy(&output));
        reporter.success(&format!("Executed instance script '{name}'"));
    }
    Ok(())
}

pub(super) fn bootstrap(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    let reporter = ctx.reporter;
    let script = &ctx.model.system.bootstrap;
    let base_dir = ctx.client.work_dir().to_owned();
    lock::do_once(ctx.client, reporter, BOOTSTRAP_ACTION, &base_dir, |client| {
        run_script(client, reporter, BOOTSTRAP_ACTION, script, ".")
    })?;
    Ok(())
}

pub(super) fn copy_files(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    if ctx.model.files.is_empty() {
        ctx.reporter.step("No files declared for copying");
    }
    for (local, remote) in &ctx.model.files {
        ctx.reporter.step(&format!("Copying '{local}' to '{remote}'"));
        ctx.client.path_copy(Utf8Path::new(local), remote, true)?;
    }
    Ok(())
}

pub(super) fn prepare_work_dir(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    ctx.client.dir_ensure(ctx.client.work_dir())?;
    Ok(())
}

pub(super) fn prepare_data_dir(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    ctx.client.dir_ensure(ctx.client.data_dir())?;
    Ok(())
}

pub(super) fn install_tool(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    if !ctx.model.compose.download {
        ctx.reporter
            .step("Skipping tool wrapper download; expecting it under the data directory");
        return Ok(());
    }
    if ctx.client.file_exists(&ctx.model.tool_path())? {
        ctx.reporter.step("Tool wrapper already installed");
        return Ok(());
    }

    ctx.reporter.step("Downloading tool wrapper");
    let command = format!("curl -s '{TOOL_WRAPPER_URL}' -o 'aemw'");
    let output = ctx
        .client
        .run_shell_command(&command, ctx.client.data_dir())?;
    ctx.reporter
        .output(&command, &String::from_utf8_lossy(&output));
    Ok(())
}

pub(super) fn write_config(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    let path = ctx.model.config_path();
    let config = &ctx.model.compose.config;
    if config.trim().is_empty() {
        ctx.reporter.step(&format!(
            "No configuration payload declared; leaving '{path}' untouched"
        ));
        return Ok(());
    }
    ctx.client.file_write(&path, config.as_bytes())?;
    Ok(())
}

pub(super) fn create_script(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    run_script(
        ctx.client,
        ctx.reporter,
        "create",
        &ctx.model.compose.create,
        ctx.client.data_dir(),
    )?;
    Ok(())
}

pub(super) fn configure_service(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    let system = &ctx.model.system;
    let user = if system.user.trim().is_empty() {
        ctx.client.user().unwrap_or_default()
    } else {
        system.user.clone()
    };
    let unit = service::render_unit(&system.service_config, ctx.client.data_dir(), &user)
        .map_err(|message| StepError::ConfigTemplate { message })?;
    let path = service::unit_path(ctx.service_name);
    ctx.client.privileged().file_write(&path, unit.as_bytes())?;
    service::service_action(ctx.client, ctx.reporter, ctx.service_name, "enable")?;
    Ok(())
}

pub(super) fn save_env_profile(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    let path = ctx
        .client
        .save_env_profile(ctx.service_name, &ctx.model.system.env)?;
    ctx.reporter
        .step(&format!("Saved environment variables to '{path}'"));
    Ok(())
}

pub(super) fn start_service(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    service::service_action(ctx.client, ctx.reporter, ctx.service_name, "start")?;
    Ok(())
}

pub(super) fn apply_config(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    let output = ctx
        .client
        .run_shell_command(APPLY_CONFIG_COMMAND, ctx.client.data_dir())?;
    ctx.reporter
        .output(APPLY_CONFIG_COMMAND, &String::from_utf8_lossy(&output));
    Ok(())
}

pub(super) fn configure_script(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    run_script(
        ctx.client,
        ctx.reporter,
        "configure",
        &ctx.model.compose.configure,
        ctx.client.data_dir(),
    )?;
    Ok(())
}

pub(super) fn stop_service(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    service::service_action(ctx.client, ctx.reporter, ctx.service_name, "stop")?;
    Ok(())
}

pub(super) fn delete_script(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    run_script(
        ctx.client,
        ctx.reporter,
        "delete",
        &ctx.model.compose.delete,
        ctx.client.data_dir(),
    )?;
    Ok(())
}

pub(super) fn delete_data_dir(ctx: &mut InstanceContext<'_>) -> Result<(), StepError> {
    ctx.client.path_delete(ctx.client.data_dir())?;
    Ok(())
}
