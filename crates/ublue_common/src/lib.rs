//! ublue-update core - unattended update orchestration for image-based systems
//!
//! Gates updates behind hardware inhibitors, keeps one run per scope, waits for
//! rpm-ostree transactions, then updates the system and every logged-in user.

pub mod command;
pub mod config;
pub mod deployment;
pub mod error;
pub mod inhibitor;
pub mod lock;
pub mod notify;
pub mod orchestrator;
pub mod privilege;
pub mod session;
pub mod transaction;
pub mod updater;

pub use command::{CommandOutput, CommandRunner, CommandSpec, FakeCommandRunner, SystemCommandRunner};
pub use config::UpdateConfig;
pub use error::{Result, UpdateError};
pub use inhibitor::{CheckOutcome, InhibitorCheck, InhibitorGate, InhibitorResult};
pub use lock::{LockHandle, LockInfo};
pub use notify::{NotificationDispatcher, NotificationRequest, NotificationResponse, Urgency};
pub use orchestrator::{
    Orchestrator, Phase, RunOutcome, UpdateContext, UpdateIntent, UpdateReport, UserPassResult,
};
pub use privilege::Privilege;
pub use session::{Session, SessionResolver};
