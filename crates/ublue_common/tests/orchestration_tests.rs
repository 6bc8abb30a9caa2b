//! Orchestration tests
//!
//! Drive the full state machine with a FakeCommandRunner standing in for
//! loginctl, notify-send, rpm-ostree, topgrade and systemctl. Lock files and
//! runtime directories live in temp dirs.

use std::path::PathBuf;
use tempfile::TempDir;
use ublue_common::orchestrator::{CONFIRM_ACTION, REBOOT_ACTION};
use ublue_common::{
    lock, CheckOutcome, CommandOutput, FakeCommandRunner, InhibitorCheck, InhibitorGate,
    Orchestrator, Phase, Privilege, RunOutcome, UpdateConfig, UpdateError, UpdateIntent,
};

const IDLE: &str = r#"{"deployments":[{"booted":true}],"transaction":null}"#;
const STAGED: &str = r#"{"deployments":[{"booted":false,"staged":true},{"booted":true}],"transaction":null}"#;

// ============================================================================
// Fixtures
// ============================================================================

struct Machine {
    temp: TempDir,
    alice_dir: PathBuf,
    bob_dir: PathBuf,
}

impl Machine {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let alice_dir = temp.path().join("run/user/1000");
        let bob_dir = temp.path().join("run/user/1001");
        std::fs::create_dir_all(&alice_dir).unwrap();
        std::fs::create_dir_all(&bob_dir).unwrap();
        Self {
            temp,
            alice_dir,
            bob_dir,
        }
    }

    fn config(&self) -> UpdateConfig {
        let mut config = UpdateConfig::default();
        config.lock.system_path = self.temp.path().join("ublue-update.lock");
        config.transaction.poll_interval_secs = 0;
        config
    }

    /// loginctl answers for two active sessions: alice then bob
    fn with_sessions(&self, fake: FakeCommandRunner) -> FakeCommandRunner {
        fake.on(
            "list-sessions",
            CommandOutput::ok(r#"[{"session":"2","uid":1000},{"session":"4","uid":1001}]"#),
        )
        .on(
            "show-session 2 ",
            CommandOutput::ok("Name=alice\nUser=1000\nActive=yes\nClass=user\n"),
        )
        .on(
            "show-session 4 ",
            CommandOutput::ok("Name=bob\nUser=1001\nActive=yes\nClass=user\n"),
        )
        .on(
            "show-user alice",
            CommandOutput::ok(&format!("{}\n", self.alice_dir.display())),
        )
        .on(
            "show-user bob",
            CommandOutput::ok(&format!("{}\n", self.bob_dir.display())),
        )
    }

    fn without_sessions(&self, fake: FakeCommandRunner) -> FakeCommandRunner {
        fake.on("list-sessions", CommandOutput::ok("[]"))
    }
}

struct Fixed(CheckOutcome);

impl InhibitorCheck for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }
    fn check(&self) -> CheckOutcome {
        self.0.clone()
    }
}

fn passing_gate<'a>() -> InhibitorGate<'a> {
    InhibitorGate::new(vec![Box::new(Fixed(CheckOutcome::Pass))])
}

fn failing_gate<'a>() -> InhibitorGate<'a> {
    InhibitorGate::new(vec![
        Box::new(Fixed(CheckOutcome::Fail("Network is metered".into()))),
        Box::new(Fixed(CheckOutcome::Pass)),
        Box::new(Fixed(CheckOutcome::Fail("Battery is below 50%".into()))),
    ])
}

fn update_available(fake: FakeCommandRunner, available: bool) -> FakeCommandRunner {
    let code = if available { 0 } else { 77 };
    fake.on("upgrade --check", CommandOutput::exit(code))
}

fn position(fake: &FakeCommandRunner, pattern: &str) -> usize {
    fake.calls()
        .iter()
        .position(|c| c.command_line().contains(pattern))
        .unwrap_or_else(|| panic!("no call matching {}", pattern))
}

// ============================================================================
// Happy path
// ============================================================================

#[test]
fn test_two_sessions_get_system_then_user_passes() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(
        FakeCommandRunner::new().on("status --json", CommandOutput::ok(IDLE)),
        true,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let outcome = orch.run(UpdateIntent::default()).unwrap();

    let RunOutcome::Updated(report) = outcome else {
        panic!("expected Updated, got {:?}", outcome);
    };
    assert_eq!(report.system_exit_code, Some(0));
    assert_eq!(report.user_passes.len(), 2);
    assert!(report.user_passes.iter().all(|p| p.succeeded()));
    assert!(!report.reboot_requested);

    assert_eq!(fake.count("topgrade-system.toml"), 1);
    let user_runs = fake.calls_matching("topgrade-user.toml");
    assert_eq!(user_runs.len(), 2);
    assert!(user_runs[0].contains("-u alice"));
    assert!(user_runs[1].contains("-u bob"));

    // System pass strictly before any user pass
    assert!(position(&fake, "topgrade-system.toml") < position(&fake, "topgrade-user.toml"));

    // Completion notification delivered once to each session
    let done = fake.calls_matching("System update complete");
    assert_eq!(done.len(), 2);
    assert_eq!(
        orch.phases().iter().filter(|p| **p == Phase::NotifyingDone).count(),
        1
    );

    // Lock was released
    assert!(lock::acquire(&config.lock.system_path, "system")
        .unwrap()
        .is_some());
}

#[test]
fn test_system_only_skips_user_passes() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(FakeCommandRunner::new(), true));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let outcome = orch
        .run(UpdateIntent {
            system: true,
            ..UpdateIntent::default()
        })
        .unwrap();

    let RunOutcome::Updated(report) = outcome else {
        panic!("expected Updated");
    };
    assert!(report.user_passes.is_empty());
    assert_eq!(fake.count("topgrade-system.toml"), 1);
    assert_eq!(fake.count("topgrade-user.toml"), 0);
    assert!(!orch.phases().contains(&Phase::RunningUsers));
}

#[test]
fn test_zero_sessions_is_noop_user_phase() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.without_sessions(update_available(FakeCommandRunner::new(), true));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let RunOutcome::Updated(report) = orch.run(UpdateIntent::default()).unwrap() else {
        panic!("expected Updated");
    };
    assert!(report.user_passes.is_empty());
    assert_eq!(fake.count("topgrade-system.toml"), 1);
    assert_eq!(fake.count("notify-send"), 0);
}

#[test]
fn test_waits_for_transaction_before_running() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.without_sessions(update_available(
        FakeCommandRunner::new()
            .once(
                "status --json",
                CommandOutput::ok(r#"{"transaction":["upgrade"],"deployments":[]}"#),
            )
            .on("status --json", CommandOutput::ok(IDLE)),
        true,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    orch.run(UpdateIntent::default()).unwrap();

    let statuses: Vec<usize> = fake
        .calls()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.command_line().contains("status --json"))
        .map(|(i, _)| i)
        .collect();
    assert!(statuses.len() >= 2);
    assert!(statuses[1] < position(&fake, "topgrade-system.toml"));
}

// ============================================================================
// Escalation and gating
// ============================================================================

#[test]
fn test_confirmed_escalation_runs_as_if_forced() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(
        FakeCommandRunner::new().on(
            "--action=universal-blue-update-confirm",
            CommandOutput::ok(&format!("{}\n", CONFIRM_ACTION)),
        ),
        true,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, failing_gate());
    let outcome = orch.run(UpdateIntent::default()).unwrap();
    assert!(matches!(outcome, RunOutcome::Updated(_)));

    // Alice answered, so bob was never asked
    let asks = fake.calls_matching("--action=universal-blue-update-confirm");
    assert_eq!(asks.len(), 1);
    assert!(asks[0].contains("--urgency=critical"));

    // Escalation happened before locking
    let phases = orch.phases();
    let escalating = phases.iter().position(|p| *p == Phase::Escalating).unwrap();
    let locking = phases.iter().position(|p| *p == Phase::Locking).unwrap();
    assert!(escalating < locking);
    assert!(phases.contains(&Phase::Waiting));
    assert_eq!(fake.count("topgrade-system.toml"), 1);
    assert_eq!(fake.count("topgrade-user.toml"), 2);
}

#[test]
fn test_unanswered_escalation_aborts_without_lock() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(FakeCommandRunner::new(), true));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, failing_gate());
    let err = orch.run(UpdateIntent::default()).unwrap_err();

    match err {
        UpdateError::Gated { reasons } => {
            assert_eq!(reasons, vec!["Network is metered", "Battery is below 50%"]);
        }
        other => panic!("expected Gated, got {:?}", other),
    }
    // Both sessions asked, nobody answered
    assert_eq!(fake.count("--action=universal-blue-update-confirm"), 2);
    assert!(!orch.phases().contains(&Phase::Locking));
    assert!(!config.lock.system_path.exists());
    assert_eq!(fake.count("topgrade"), 0);
}

#[test]
fn test_unreachable_sessions_abort_escalation() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.without_sessions(update_available(FakeCommandRunner::new(), true));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, failing_gate());
    let err = orch.run(UpdateIntent::default()).unwrap_err();
    assert!(matches!(err, UpdateError::Gated { .. }));
    assert!(orch.phases().contains(&Phase::Escalating));
    assert!(orch.phases().contains(&Phase::GatedAbort));
}

#[test]
fn test_failed_checks_without_update_never_escalate() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(FakeCommandRunner::new(), false));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, failing_gate());
    let err = orch.run(UpdateIntent::default()).unwrap_err();
    assert!(matches!(err, UpdateError::Gated { .. }));
    assert_eq!(fake.count("notify-send"), 0);
    assert!(!orch.phases().contains(&Phase::Escalating));
}

#[test]
fn test_notifications_disabled_never_escalate() {
    let machine = Machine::new();
    let mut config = machine.config();
    config.notify.dbus_notify = false;
    let fake = machine.with_sessions(update_available(FakeCommandRunner::new(), true));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, failing_gate());
    assert!(matches!(
        orch.run(UpdateIntent::default()),
        Err(UpdateError::Gated { .. })
    ));
    assert_eq!(fake.count("notify-send"), 0);
}

#[test]
fn test_force_skips_inhibitors() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.without_sessions(update_available(FakeCommandRunner::new(), false));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, failing_gate());
    let outcome = orch
        .run(UpdateIntent {
            force: true,
            ..UpdateIntent::default()
        })
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Updated(_)));
    assert!(!orch.phases().contains(&Phase::Checking));
}

#[test]
fn test_check_only_with_passing_inhibitors() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(FakeCommandRunner::new(), true));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let outcome = orch
        .run(UpdateIntent {
            check: true,
            ..UpdateIntent::default()
        })
        .unwrap();
    assert_eq!(outcome, RunOutcome::Checked);
    assert!(!config.lock.system_path.exists());
    assert_eq!(fake.count("topgrade"), 0);
    assert!(!orch.phases().contains(&Phase::Locking));
}

#[test]
fn test_update_check_reports_availability() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = update_available(FakeCommandRunner::new(), true);

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, failing_gate());
    let outcome = orch
        .run(UpdateIntent {
            update_check: true,
            ..UpdateIntent::default()
        })
        .unwrap();
    assert_eq!(outcome, RunOutcome::UpdateAvailable);
    assert_eq!(fake.count("topgrade"), 0);
}

// ============================================================================
// Failures during the run
// ============================================================================

#[test]
fn test_system_failure_stops_user_passes_and_releases_lock() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(
        FakeCommandRunner::new().on(
            "topgrade-system.toml",
            CommandOutput {
                code: Some(4),
                stdout: "Step failed: system".into(),
                stderr: String::new(),
            },
        ),
        true,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let err = orch.run(UpdateIntent::default()).unwrap_err();

    match &err {
        UpdateError::SystemUpdateFailed { code, output } => {
            assert_eq!(*code, 4);
            assert_eq!(output, "Step failed: system");
        }
        other => panic!("expected SystemUpdateFailed, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 4);
    assert_eq!(fake.count("topgrade-user.toml"), 0);
    assert!(!orch.phases().contains(&Phase::RunningUsers));
    assert_eq!(orch.phases().last(), Some(&Phase::Terminal));
    assert!(lock::acquire(&config.lock.system_path, "system")
        .unwrap()
        .is_some());
}

#[test]
fn test_user_failure_does_not_stop_siblings() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(
        FakeCommandRunner::new().on_all(&["-u alice", "topgrade-user.toml"], CommandOutput::exit(1)),
        true,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let RunOutcome::Updated(report) = orch.run(UpdateIntent::default()).unwrap() else {
        panic!("expected Updated");
    };

    assert_eq!(report.system_exit_code, Some(0));
    assert_eq!(report.user_passes.len(), 2);
    assert_eq!(report.user_passes[0].user, "alice");
    assert!(!report.user_passes[0].succeeded());
    assert_eq!(report.user_passes[1].user, "bob");
    assert!(report.user_passes[1].succeeded());
}

#[test]
fn test_lock_contention_fails_fast() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(FakeCommandRunner::new(), true));

    let _held = lock::acquire(&config.lock.system_path, "system")
        .unwrap()
        .unwrap();

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let err = orch.run(UpdateIntent::default()).unwrap_err();
    assert!(matches!(err, UpdateError::AlreadyRunning { .. }));
    assert_eq!(fake.count("topgrade"), 0);
    assert!(!orch.phases().contains(&Phase::Waiting));
}

// ============================================================================
// Reboot prompt
// ============================================================================

#[test]
fn test_pending_deployment_reboot_confirmed() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(
        FakeCommandRunner::new()
            .on("status --json", CommandOutput::ok(STAGED))
            .on(
                "--action=universal-blue-update-reboot",
                CommandOutput::ok(&format!("{}\n", REBOOT_ACTION)),
            ),
        true,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let RunOutcome::Updated(report) = orch.run(UpdateIntent::default()).unwrap() else {
        panic!("expected Updated");
    };
    assert!(report.reboot_requested);
    assert_eq!(fake.count("systemctl reboot"), 1);
    assert!(orch.phases().contains(&Phase::RebootPrompt));
}

#[test]
fn test_pending_deployment_reboot_declined() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(
        FakeCommandRunner::new().on("status --json", CommandOutput::ok(STAGED)),
        true,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    let RunOutcome::Updated(report) = orch.run(UpdateIntent::default()).unwrap() else {
        panic!("expected Updated");
    };
    assert!(!report.reboot_requested);
    assert_eq!(fake.count("--action=universal-blue-update-reboot"), 2);
    assert_eq!(fake.count("systemctl reboot"), 0);
}

#[test]
fn test_no_reboot_prompt_without_update() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = machine.with_sessions(update_available(
        FakeCommandRunner::new().on("status --json", CommandOutput::ok(STAGED)),
        false,
    ));

    let mut orch = Orchestrator::new(&config, &fake, Privilege::Root, passing_gate());
    orch.run(UpdateIntent::default()).unwrap();
    assert_eq!(fake.count("--action=universal-blue-update-reboot"), 0);
    assert!(!orch.phases().contains(&Phase::RebootPrompt));
}

// ============================================================================
// Unprivileged scope
// ============================================================================

#[test]
fn test_user_run_locks_runtime_dir_and_updates_self() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = update_available(FakeCommandRunner::new(), true);

    let mut orch = Orchestrator::new(&config, &fake, Privilege::User { uid: 1000 }, passing_gate())
        .with_runtime_dir(&machine.alice_dir);
    let RunOutcome::Updated(report) = orch.run(UpdateIntent::default()).unwrap() else {
        panic!("expected Updated");
    };

    assert_eq!(report.system_exit_code, None);
    assert_eq!(report.user_passes.len(), 1);
    assert_eq!(fake.count("topgrade-system.toml"), 0);
    assert_eq!(fake.count("sudo"), 0);
    assert_eq!(fake.count("loginctl"), 0);
    assert_eq!(
        fake.calls_matching("topgrade-user.toml")[0],
        "/usr/bin/topgrade --config /usr/share/ublue-update/topgrade-user.toml"
    );
    assert!(machine.alice_dir.join("ublue-update.lock").exists());
    assert!(!config.lock.system_path.exists());
}

#[test]
fn test_user_scope_does_not_contend_with_system_scope() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = update_available(FakeCommandRunner::new(), true);

    let _root = lock::acquire(&config.lock.system_path, "system")
        .unwrap()
        .unwrap();

    let mut orch = Orchestrator::new(&config, &fake, Privilege::User { uid: 1001 }, passing_gate())
        .with_runtime_dir(&machine.bob_dir);
    assert!(orch.run(UpdateIntent::default()).is_ok());
}

#[test]
fn test_user_escalation_uses_own_bus() {
    let machine = Machine::new();
    let config = machine.config();
    let fake = update_available(
        FakeCommandRunner::new().on(
            "--action=universal-blue-update-confirm",
            CommandOutput::ok(&format!("{}\n", CONFIRM_ACTION)),
        ),
        true,
    );

    let mut orch = Orchestrator::new(&config, &fake, Privilege::User { uid: 1000 }, failing_gate())
        .with_runtime_dir(&machine.alice_dir);
    assert!(matches!(
        orch.run(UpdateIntent::default()),
        Ok(RunOutcome::Updated(_))
    ));
    let asks = fake.calls_matching("--action=universal-blue-update-confirm");
    assert_eq!(asks.len(), 1);
    assert!(asks[0].starts_with("/usr/bin/notify-send"));
}
