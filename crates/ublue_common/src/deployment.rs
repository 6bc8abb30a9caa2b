//! rpm-ostree deployment state
//!
//! Answers the questions the orchestrator asks the image-based system:
//! is an update available, is a transaction in flight, is a new deployment
//! staged for the next boot.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::UpdateConfig;
use crate::error::{Result, UpdateError};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Exit code of `rpm-ostree upgrade --check` when nothing is available
pub const NO_UPDATE_EXIT_CODE: i32 = 77;

/// Subset of `rpm-ostree status --json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpmOstreeStatus {
    /// Active transaction, `null` when idle
    #[serde(default)]
    pub transaction: Option<serde_json::Value>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub booted: bool,
    #[serde(default)]
    pub staged: bool,
}

impl RpmOstreeStatus {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn transaction_active(&self) -> bool {
        self.transaction.as_ref().is_some_and(|t| !t.is_null())
    }

    /// The default (first) deployment is not the booted one
    pub fn pending_deployment(&self) -> bool {
        self.deployments.first().is_some_and(|d| !d.booted)
    }
}

/// rpm-ostree and systemctl front-end
pub struct SystemImage<R> {
    runner: R,
    rpm_ostree: PathBuf,
    systemctl: PathBuf,
}

impl<R: CommandRunner> SystemImage<R> {
    pub fn new(runner: R, config: &UpdateConfig) -> Self {
        Self {
            runner,
            rpm_ostree: config.tools.rpm_ostree.clone(),
            systemctl: config.tools.systemctl.clone(),
        }
    }

    /// `rpm-ostree status --json`
    pub fn status(&self) -> Result<RpmOstreeStatus> {
        let spec = CommandSpec::new(&self.rpm_ostree).args(["status", "--json"]);
        let out = self.exec(&spec)?;
        RpmOstreeStatus::parse(&out.stdout)
    }

    /// Whether `rpm-ostree upgrade --check` reports a new image
    pub fn update_available(&self) -> bool {
        let spec = CommandSpec::new(&self.rpm_ostree).args(["upgrade", "--check"]);
        match self.exec(&spec) {
            Ok(out) if out.success() => {
                info!("System update available");
                true
            }
            Ok(out) if out.code == Some(NO_UPDATE_EXIT_CODE) => {
                debug!("No system update available");
                false
            }
            Ok(out) => {
                warn!(
                    "rpm-ostree upgrade --check exited with {:?}: {}",
                    out.code,
                    out.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("update check failed: {}", e);
                false
            }
        }
    }

    /// Whether a staged deployment waits for a reboot
    pub fn pending_deployment(&self) -> bool {
        match self.status() {
            Ok(status) => status.pending_deployment(),
            Err(e) => {
                warn!("failed to read deployment status: {}", e);
                false
            }
        }
    }

    /// Ask systemd to reboot the machine
    pub fn reboot(&self) -> Result<()> {
        let spec = CommandSpec::new(&self.systemctl).arg("reboot");
        let out = self.exec(&spec)?;
        if !out.success() {
            warn!("systemctl reboot exited with {:?}: {}", out.code, out.stderr.trim());
        }
        Ok(())
    }

    fn exec(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.runner.run(spec).map_err(|source| UpdateError::Command {
            program: spec.program.clone(),
            source,
        })
    }
}
