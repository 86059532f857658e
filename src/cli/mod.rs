//! Command-line interface definitions for the `aem-provision` binary.
//!
//! This module holds only the clap parser structures so the build script can
//! reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `aem-provision` binary.
#[derive(Debug, Parser)]
#[command(
    name = "aem-provision",
    about = "Converge a remote machine into a running AEM Compose deployment",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Bootstrap the machine and create the instances.
    #[command(name = "create", about = "Bootstrap the machine and create the instances")]
    Create(ModelArgs),
    /// Re-apply files, configuration, and the service without bootstrapping.
    #[command(
        name = "update",
        about = "Re-apply files, configuration, and the service without bootstrapping"
    )]
    Update(ModelArgs),
    /// Stop the service, delete the instances, and remove the data directory.
    #[command(
        name = "delete",
        about = "Stop the service, delete the instances, and remove the data directory"
    )]
    Delete(ModelArgs),
    /// Print the status of the deployed instances as JSON.
    #[command(name = "status", about = "Print the status of the deployed instances as JSON")]
    Status(ModelArgs),
}

/// Arguments shared by every lifecycle subcommand.
#[derive(Debug, Args)]
pub(crate) struct ModelArgs {
    /// Instance model file; `.json` is read as JSON, anything else as YAML.
    #[arg(long, short = 'm', value_name = "PATH")]
    pub(crate) model: String,
    /// Override the host service name used for the unit and profile files.
    #[arg(long, value_name = "NAME")]
    pub(crate) service_name: Option<String>,
}
