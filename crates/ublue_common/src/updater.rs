//! Update tool invocation (topgrade)
//!
//! One tool, two profiles: the system profile runs as root, the user profile
//! runs once per session as that session's user.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::UpdateConfig;
use crate::error::{Result, UpdateError};
use crate::session::Session;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct UpdateTool<R> {
    runner: R,
    topgrade: PathBuf,
    system_profile: PathBuf,
    user_profile: PathBuf,
    sudo: PathBuf,
}

impl<R: CommandRunner> UpdateTool<R> {
    pub fn new(runner: R, config: &UpdateConfig) -> Self {
        Self {
            runner,
            topgrade: config.tools.topgrade.clone(),
            system_profile: config.tools.system_profile.clone(),
            user_profile: config.tools.user_profile.clone(),
            sudo: config.tools.sudo.clone(),
        }
    }

    /// System pass with the system profile
    pub fn run_system(&self) -> Result<CommandOutput> {
        let spec = self.topgrade_command(&self.system_profile);
        self.exec(&spec)
    }

    /// User pass for another user's session, run as that user
    pub fn run_for_session(&self, session: &Session) -> Result<CommandOutput> {
        let spec = session.command_as(&self.sudo, &self.topgrade_command(&self.user_profile));
        self.exec(&spec)
    }

    /// User pass for the calling user
    pub fn run_for_caller(&self) -> Result<CommandOutput> {
        let spec = self.topgrade_command(&self.user_profile);
        self.exec(&spec)
    }

    fn topgrade_command(&self, profile: &Path) -> CommandSpec {
        CommandSpec::new(&self.topgrade)
            .arg("--config")
            .arg(profile.to_string_lossy().to_string())
    }

    fn exec(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let out = self.runner.run(spec).map_err(|source| UpdateError::Command {
            program: spec.program.clone(),
            source,
        })?;
        debug!("{}", out.stdout);
        if !out.stderr.is_empty() {
            debug!("{}", out.stderr);
        }
        Ok(out)
    }
}
