//! ublue-update - unattended system and user updates for Universal Blue images
//!
//! Parses the command line, wires the real command runner into the
//! orchestrator and turns the outcome into an exit status.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use tracing::{error, info};
use ublue_common::{
    InhibitorGate, Orchestrator, Privilege, RunOutcome, SystemCommandRunner, UpdateConfig,
    UpdateError,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    match run(&cli) {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn run(cli: &Cli) -> Result<RunOutcome> {
    let config = UpdateConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let runner = SystemCommandRunner;
    let privilege = Privilege::detect();
    info!(scope = privilege.as_str(), "ublue-update v{} starting", env!("CARGO_PKG_VERSION"));

    let gate = InhibitorGate::standard(&runner, &config);
    let mut orchestrator = Orchestrator::new(&config, &runner, privilege, gate);
    Ok(orchestrator.run(cli.intent())?)
}

fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Waited => info!("No rpm-ostree transaction in progress"),
        RunOutcome::Checked => info!("Update checks passed"),
        RunOutcome::UpdateAvailable => info!("Update available"),
        RunOutcome::Updated(report) => {
            let failed: Vec<&str> = report
                .user_passes
                .iter()
                .filter(|p| !p.succeeded())
                .map(|p| p.user.as_str())
                .collect();
            if !failed.is_empty() {
                info!("User updates reported failures for: {}", failed.join(", "));
            }
            if report.reboot_requested {
                info!("Reboot requested");
            }
        }
    }
}

/// Exit status for a failed run, from the library error when there is one
fn exit_status(err: &anyhow::Error) -> u8 {
    let code = err
        .downcast_ref::<UpdateError>()
        .map(UpdateError::exit_code)
        .unwrap_or(1);
    u8::try_from(code).ok().filter(|c| *c != 0).unwrap_or(1)
}
