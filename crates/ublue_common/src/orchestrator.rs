//! Update orchestration
//!
//! State machine:
//! 1. Checking       - hardware inhibitors (skipped for --force / --updatecheck)
//! 2. Escalating     - checks failed but an update exists: ask a human
//! 3. GatedAbort     - checks failed and nobody confirmed
//! 4. Locking        - single-instance lock for this scope
//! 5. Waiting        - no rpm-ostree transaction in flight
//! 6. RunningSystem  - topgrade with the system profile (root only)
//! 7. RunningUsers   - topgrade with the user profile, per session
//! 8. NotifyingDone  - completion notification
//! 9. RebootPrompt   - staged deployment: offer a reboot
//!
//! The orchestrator never exits the process. Every terminal path returns a
//! `RunOutcome` or an `UpdateError` and the binary picks the exit code. The
//! lock is released before `run` returns, whichever path was taken.

use crate::command::CommandRunner;
use crate::config::UpdateConfig;
use crate::deployment::SystemImage;
use crate::error::{Result, UpdateError};
use crate::inhibitor::InhibitorGate;
use crate::lock;
use crate::notify::{any_selected, NotificationDispatcher, NotificationRequest, Urgency};
use crate::privilege::{self, Privilege};
use crate::session::{Session, SessionResolver};
use crate::transaction::TransactionWaiter;
use crate::updater::UpdateTool;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

pub const NOTIFY_TITLE: &str = "System Updater";
pub const CONFIRM_ACTION: &str = "universal-blue-update-confirm";
pub const REBOOT_ACTION: &str = "universal-blue-update-reboot";

/// What the caller asked for on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateIntent {
    /// Skip inhibitor checks
    pub force: bool,
    /// Run inhibitor checks and stop
    pub check: bool,
    /// Report whether an update is available and stop
    pub update_check: bool,
    /// Wait for transactions and stop
    pub wait: bool,
    /// Skip per-user passes (root only)
    pub system: bool,
}

/// Facts fixed once at the start of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateContext {
    pub system_only: bool,
    pub update_available: bool,
    pub check_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Checking,
    Escalating,
    GatedAbort,
    Proceeding,
    Locking,
    Waiting,
    RunningSystem,
    RunningUsers,
    NotifyingDone,
    RebootPrompt,
    Terminal,
}

/// One per-user topgrade pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassResult {
    pub user: String,
    pub exit_code: Option<i32>,
    /// Set when the tool could not be started
    pub error: Option<String>,
}

impl UserPassResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

/// Summary of a completed update run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Exit code of the system pass, `None` when it did not run
    pub system_exit_code: Option<i32>,
    pub user_passes: Vec<UserPassResult>,
    pub reboot_requested: bool,
}

/// Successful terminal states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// `--wait` finished
    Waited,
    /// `--check` passed
    Checked,
    /// `--updatecheck` found an update
    UpdateAvailable,
    Updated(UpdateReport),
}

pub struct Orchestrator<'a, R> {
    config: &'a UpdateConfig,
    runner: &'a R,
    privilege: Privilege,
    gate: InhibitorGate<'a>,
    /// Caller runtime directory override, resolved from the environment otherwise
    runtime_dir: Option<PathBuf>,
    sessions: Option<Vec<Session>>,
    phases: Vec<Phase>,
}

impl<'a, R: CommandRunner> Orchestrator<'a, R> {
    pub fn new(
        config: &'a UpdateConfig,
        runner: &'a R,
        privilege: Privilege,
        gate: InhibitorGate<'a>,
    ) -> Self {
        Self {
            config,
            runner,
            privilege,
            gate,
            runtime_dir: None,
            sessions: None,
            phases: Vec::new(),
        }
    }

    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Phases visited so far, in order
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn run(&mut self, intent: UpdateIntent) -> Result<RunOutcome> {
        self.enter(Phase::Idle);

        if intent.wait {
            self.transaction_waiter().wait_until_quiesced()?;
            self.enter(Phase::Terminal);
            return Ok(RunOutcome::Waited);
        }

        // --force skips the checks, so --check alone does not stop an update
        let will_update = !intent.update_check && (intent.force || !intent.check);
        if will_update && intent.system && !self.privilege.is_root() {
            error!("system updates requested without root privileges");
            self.enter(Phase::Terminal);
            return Err(UpdateError::RequiresRoot);
        }

        let ctx = UpdateContext {
            system_only: intent.system,
            update_available: self.image().update_available(),
            check_only: intent.check,
        };

        if !intent.force && !intent.update_check {
            self.enter(Phase::Checking);
            let result = self.gate.check();
            if !result.passed {
                if ctx.update_available && !ctx.check_only && self.dispatcher().is_enabled() {
                    info!("Hardware checks failed, but update is available");
                    self.enter(Phase::Escalating);
                    if !self.escalate() {
                        return self.gated_abort(result.failure_reasons);
                    }
                    info!("Update confirmed by user, proceeding despite failed checks");
                } else {
                    return self.gated_abort(result.failure_reasons);
                }
            } else if ctx.check_only {
                info!("System passed all update checks");
                self.enter(Phase::Terminal);
                return Ok(RunOutcome::Checked);
            }
        }

        if intent.update_check {
            self.enter(Phase::Terminal);
            return if ctx.update_available {
                Ok(RunOutcome::UpdateAvailable)
            } else {
                Err(UpdateError::NoUpdate)
            };
        }

        info!("System passed all update checks");
        self.run_updates(ctx)
    }

    fn gated_abort(&mut self, reasons: Vec<String>) -> Result<RunOutcome> {
        self.enter(Phase::GatedAbort);
        self.enter(Phase::Terminal);
        Err(UpdateError::Gated { reasons })
    }

    /// Ask the logged-in users whether to update anyway
    fn escalate(&mut self) -> bool {
        let targets = self.sessions();
        let request = NotificationRequest::new(
            NOTIFY_TITLE,
            "Update available, but system checks failed. Update now?",
        )
        .with_action(CONFIRM_ACTION, "Confirm")
        .with_urgency(Urgency::Critical);

        let responses = self.dispatcher().notify(&request, &targets);
        any_selected(&responses, CONFIRM_ACTION)
    }

    fn run_updates(&mut self, ctx: UpdateContext) -> Result<RunOutcome> {
        self.enter(Phase::Proceeding);
        self.enter(Phase::Locking);

        let acquired = privilege::lock_path(self.privilege, &self.config.lock, self.runtime_dir.clone())
            .and_then(|path| lock::acquire_or_fail(&path, self.privilege.as_str()));
        let handle = match acquired {
            Ok(handle) => handle,
            Err(e) => {
                if let UpdateError::AlreadyRunning { path } = &e {
                    if let Some(holder) = lock::LockInfo::read(path) {
                        warn!(
                            pid = holder.pid,
                            since = %holder.acquired_at,
                            "another {} update is running",
                            holder.scope
                        );
                    }
                }
                self.enter(Phase::Terminal);
                return Err(e);
            }
        };

        let result = self.run_locked(ctx);
        lock::release(handle);
        self.enter(Phase::Terminal);
        result
    }

    fn run_locked(&mut self, ctx: UpdateContext) -> Result<RunOutcome> {
        self.enter(Phase::Waiting);
        self.transaction_waiter().wait_until_quiesced()?;

        let tool = UpdateTool::new(self.runner, self.config);
        let mut report = UpdateReport::default();

        if self.privilege.is_root() {
            let sessions = self.sessions();
            self.dispatcher().notify(
                &NotificationRequest::new(NOTIFY_TITLE, "System passed checks, updating ..."),
                &sessions,
            );

            self.enter(Phase::RunningSystem);
            let out = tool.run_system()?;
            report.system_exit_code = out.code;
            if !out.success() {
                error!("topgrade returned code {}", out.exit_code());
                return Err(UpdateError::SystemUpdateFailed {
                    code: out.exit_code(),
                    output: out.stdout,
                });
            }

            if !ctx.system_only {
                self.enter(Phase::RunningUsers);
                for session in &sessions {
                    info!("Running update for user: '{}'", session.user_name);
                    report
                        .user_passes
                        .push(user_pass(&session.user_name, tool.run_for_session(session)));
                }
            }
        } else {
            self.enter(Phase::RunningUsers);
            let user = self.privilege.user_name();
            info!("Running update for user: '{}'", user);
            report.user_passes.push(user_pass(&user, tool.run_for_caller()));
        }

        info!("System update complete");
        self.enter(Phase::NotifyingDone);
        let sessions = self.sessions();
        let dispatcher = self.dispatcher();
        dispatcher.notify(
            &NotificationRequest::new(NOTIFY_TITLE, "System update complete"),
            &sessions,
        );

        if self.privilege.is_root()
            && ctx.update_available
            && dispatcher.is_enabled()
            && self.image().pending_deployment()
        {
            self.enter(Phase::RebootPrompt);
            let request = NotificationRequest::new(
                NOTIFY_TITLE,
                "System update complete, pending changes will take effect after reboot. Reboot now?",
            )
            .with_action(REBOOT_ACTION, "Reboot Now");
            let responses = dispatcher.notify(&request, &sessions);
            if any_selected(&responses, REBOOT_ACTION) {
                info!("Reboot confirmed by user");
                self.image().reboot()?;
                report.reboot_requested = true;
            }
        }

        Ok(RunOutcome::Updated(report))
    }

    /// Session snapshot for this run; root only
    fn sessions(&mut self) -> Vec<Session> {
        if !self.privilege.is_root() {
            return Vec::new();
        }
        let runner = self.runner;
        let loginctl = self.config.tools.loginctl.clone();
        self.sessions
            .get_or_insert_with(|| {
                let sessions = SessionResolver::new(runner, loginctl).active_sessions();
                debug!(count = sessions.len(), "resolved active sessions");
                sessions
            })
            .clone()
    }

    fn dispatcher(&self) -> NotificationDispatcher<&'a R> {
        NotificationDispatcher::new(self.runner, self.privilege, self.config)
    }

    fn image(&self) -> SystemImage<&'a R> {
        SystemImage::new(self.runner, self.config)
    }

    fn transaction_waiter(&self) -> TransactionWaiter<&'a R> {
        TransactionWaiter::new(self.runner, self.config)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(?phase, "entering phase");
        self.phases.push(phase);
    }
}

fn user_pass(user: &str, result: Result<crate::command::CommandOutput>) -> UserPassResult {
    match result {
        Ok(out) => {
            if !out.success() {
                warn!(user = %user, "user update returned code {}: {}", out.exit_code(), out.stderr.trim());
            }
            UserPassResult {
                user: user.to_string(),
                exit_code: out.code,
                error: None,
            }
        }
        Err(e) => {
            warn!(user = %user, "user update failed: {}", e);
            UserPassResult {
                user: user.to_string(),
                exit_code: None,
                error: Some(e.to_string()),
            }
        }
    }
}
