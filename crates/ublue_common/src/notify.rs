//! Desktop notifications - reaches users through their session bus
//!
//! Behaviour depends on who is calling:
//! - Unprivileged: one notify-send on the caller's own bus
//! - Root: one notify-send per active session, run as that session's user
//!
//! Requests with actions wait for the user; the first session that picks an
//! offered action answers for everyone.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::UpdateConfig;
use crate::privilege::Privilege;
use crate::session::Session;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const APP_NAME: &str = "Universal Blue Updater";
pub const APP_ICON: &str = "software-update-available-symbolic";

/// Notification urgency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// A button offered on the notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    /// Key printed by notify-send when chosen
    pub id: String,
    pub label: String,
}

impl NotificationAction {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
    pub urgency: Urgency,
}

impl NotificationRequest {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            actions: Vec::new(),
            urgency: Urgency::Normal,
        }
    }

    pub fn with_action(mut self, id: &str, label: &str) -> Self {
        self.actions.push(NotificationAction::new(id, label));
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn expects_response(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Offered action whose id is exactly one of the output lines
    fn match_action(&self, stdout: &str) -> Option<String> {
        stdout.lines().map(str::trim).find_map(|line| {
            self.actions
                .iter()
                .find(|action| action.id == line)
                .map(|action| action.id.clone())
        })
    }
}

/// Outcome of one delivered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse {
    /// Session user that answered, `None` for the caller's own bus
    pub user: Option<String>,
    pub raw_output: String,
    pub selected_action: Option<String>,
}

impl NotificationResponse {
    pub fn selected(&self, action_id: &str) -> bool {
        self.selected_action.as_deref() == Some(action_id)
    }
}

/// True when any response picked `action_id`
pub fn any_selected(responses: &[NotificationResponse], action_id: &str) -> bool {
    responses.iter().any(|r| r.selected(action_id))
}

/// Sends notifications over notify-send
pub struct NotificationDispatcher<R> {
    runner: R,
    privilege: Privilege,
    enabled: bool,
    notify_send: PathBuf,
    sudo: PathBuf,
}

impl<R: CommandRunner> NotificationDispatcher<R> {
    pub fn new(runner: R, privilege: Privilege, config: &UpdateConfig) -> Self {
        Self {
            runner,
            privilege,
            enabled: config.notify.dbus_notify,
            notify_send: config.tools.notify_send.clone(),
            sudo: config.tools.sudo.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deliver `request`.
    ///
    /// Root delivers to each of `targets`; other callers ignore `targets` and
    /// use their own bus. Returns one response per reached target, stopping
    /// after the first that selected an action. Disabled dispatchers return
    /// nothing.
    pub fn notify(
        &self,
        request: &NotificationRequest,
        targets: &[Session],
    ) -> Vec<NotificationResponse> {
        if !self.enabled {
            debug!("notifications disabled, dropping '{}'", request.title);
            return Vec::new();
        }

        let base = self.notify_send_command(request);

        if !self.privilege.is_root() {
            return self
                .deliver(&base, request, None)
                .into_iter()
                .collect();
        }

        let mut responses = Vec::new();
        for session in targets {
            let spec = session.command_as(&self.sudo, &base);
            let Some(response) = self.deliver(&spec, request, Some(&session.user_name)) else {
                continue;
            };
            let answered = response.selected_action.is_some();
            responses.push(response);
            if request.expects_response() && answered {
                break;
            }
        }
        responses
    }

    fn deliver(
        &self,
        spec: &CommandSpec,
        request: &NotificationRequest,
        user: Option<&str>,
    ) -> Option<NotificationResponse> {
        match self.runner.run(spec) {
            Ok(CommandOutput { code, stdout, stderr }) => {
                if code != Some(0) {
                    warn!(
                        user = user.unwrap_or("self"),
                        "notify-send exited with {:?}: {}",
                        code,
                        stderr.trim()
                    );
                    return None;
                }
                let selected_action = request.match_action(&stdout);
                if let Some(action) = &selected_action {
                    info!(user = user.unwrap_or("self"), action = %action, "notification answered");
                }
                Some(NotificationResponse {
                    user: user.map(str::to_string),
                    raw_output: stdout,
                    selected_action,
                })
            }
            Err(e) => {
                warn!(user = user.unwrap_or("self"), "failed to send notification: {}", e);
                None
            }
        }
    }

    fn notify_send_command(&self, request: &NotificationRequest) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.notify_send)
            .arg(request.title.clone())
            .arg(request.body.clone())
            .arg(format!("--app-name={}", APP_NAME))
            .arg(format!("--icon={}", APP_ICON))
            .arg(format!("--urgency={}", request.urgency.as_str()));
        for action in &request.actions {
            spec = spec.arg(format!("--action={}={}", action.id, action.label));
        }
        spec
    }
}
