//! Binary entry point for the saltfleet CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use saltfleet::{
    DoApi, DoConfig, DoError, FleetError, FleetOrchestrator, FleetPlan, ProcessCommandRunner,
    SshConfig, SshShellFactory,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("fleet run failed: {0}")]
    Fleet(#[from] FleetError<DoError>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match provision(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn provision(cli: Cli) -> Result<i32, CliError> {
    let do_config =
        DoConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let provider =
        DoApi::new(&cli.token, &do_config).map_err(|err| CliError::Provider(err.to_string()))?;

    let ssh_config =
        SshConfig::load_without_cli_args().map_err(|err| CliError::Session(err.to_string()))?;
    let shells = SshShellFactory::new(ssh_config, ProcessCommandRunner)
        .map_err(|err| CliError::Session(err.to_string()))?;

    let plan = plan_from_cli(cli);
    let mut orchestrator = FleetOrchestrator::new(provider, shells, io::stdout());
    let report = orchestrator.run(&plan).await?;

    writeln!(
        io::stdout(),
        "Fleet ready: created={}, bootstrapped={}",
        report.created,
        report.bootstrapped
    )
    .ok();
    Ok(0)
}

fn plan_from_cli(cli: Cli) -> FleetPlan {
    FleetPlan {
        min: cli.min,
        max: cli.max,
        prefix: cli.prefix,
        region: cli.location,
        image: cli.image,
        size: cli.plan,
        ssh_keys: cli.ssh_keys,
        password: cli.password,
        script_url: cli.script_url,
        salt_master: cli.saltmaster,
        salt_master_address: cli.saltmaster_address,
        pubkeyfile: cli.pubkeyfile,
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
