//! Binary entry point for the `aem-provision` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use aem_provision::{
    ConfigError, InstanceError, InstanceModel, InstanceOrchestrator, InstanceStatus, ModelError,
    ProvisionConfig, TracingReporter,
};

mod cli;

use cli::{Cli, ModelArgs};

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "AEM_PROVISION_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("{0}")]
    Instance(#[from] InstanceError),
    #[error("cannot write status: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = ProvisionConfig::load_without_cli_args()?;
    let reporter = TracingReporter;

    match cli {
        Cli::Create(args) => {
            let (orchestrator, model) = prepare(&config, &args)?;
            let status = orchestrator.create(&model, &reporter).await?;
            write_status(io::stdout(), &status)
        }
        Cli::Update(args) => {
            let (orchestrator, model) = prepare(&config, &args)?;
            let status = orchestrator.update(&model, &reporter).await?;
            write_status(io::stdout(), &status)
        }
        Cli::Delete(args) => {
            let (orchestrator, model) = prepare(&config, &args)?;
            orchestrator.delete(&model, &reporter).await?;
            Ok(())
        }
        Cli::Status(args) => {
            let (orchestrator, model) = prepare(&config, &args)?;
            let status = orchestrator.status(&model, &reporter).await?;
            write_status(io::stdout(), &status)
        }
    }
}

fn prepare(
    config: &ProvisionConfig,
    args: &ModelArgs,
) -> Result<(InstanceOrchestrator, InstanceModel), CliError> {
    let model = InstanceModel::from_path(Utf8Path::new(&args.model))?;
    let orchestrator = InstanceOrchestrator::from_config(config);
    let configured = match args.service_name.as_deref() {
        Some(name) => orchestrator.with_service_name(name),
        None => orchestrator,
    };
    Ok((configured, model))
}

fn write_status(mut target: impl Write, status: &InstanceStatus) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(status).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(target, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use aem_provision::InstanceDescriptor;
    use clap::CommandFactory;

    #[test]
    fn subcommands_accept_model_and_service_name() {
        let cli = Cli::try_parse_from([
            "aem-provision",
            "update",
            "--model",
            "instance.yaml",
            "--service-name",
            "aem-author",
        ])
        .expect("arguments should parse");

        match cli {
            Cli::Update(args) => {
                assert_eq!(args.model, "instance.yaml");
                assert_eq!(args.service_name.as_deref(), Some("aem-author"));
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }

    #[test]
    fn every_subcommand_has_a_manual_page_source() {
        let command = Cli::command();
        command.clone().debug_assert();

        let pages: Vec<_> = command
            .get_subcommands()
            .map(|sub| (sub.get_name().to_owned(), sub.get_about().is_some()))
            .collect();

        assert_eq!(
            pages,
            [
                (String::from("create"), true),
                (String::from("update"), true),
                (String::from("delete"), true),
                (String::from("status"), true),
            ]
        );
    }

    #[test]
    fn model_is_required() {
        let err = Cli::try_parse_from(["aem-provision", "create"])
            .expect_err("missing --model should be rejected");

        assert!(err.to_string().contains("--model"), "{err}");
    }

    #[test]
    fn write_status_renders_json() {
        let status = InstanceStatus {
            instances: vec![InstanceDescriptor {
                id: String::from("author"),
                url: String::from("http://127.0.0.1:4502"),
                ..InstanceDescriptor::default()
            }],
        };
        let mut buf = Vec::new();

        write_status(&mut buf, &status).expect("status should serialise");

        let rendered = String::from_utf8(buf).expect("utf8");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("valid json");
        assert_eq!(value["instances"][0]["id"], "author");
        assert_eq!(value["instances"][0]["url"], "http://127.0.0.1:4502");
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Output(String::from("broken pipe"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(
            rendered.contains("cannot write status: broken pipe"),
            "rendered: {rendered}"
        );
    }
}
