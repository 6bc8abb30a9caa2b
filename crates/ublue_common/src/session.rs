//! Active login session discovery
//!
//! Uses loginctl to enumerate active interactive sessions and resolve each
//! user's runtime directory (where their session bus socket lives). A session
//! that cannot be resolved is logged and skipped so one broken login never
//! blocks updates for everyone else.

use crate::command::{CommandRunner, CommandSpec};
use crate::error::{Result, UpdateError};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Active interactive login for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_name: String,
    pub uid: u32,
    pub runtime_dir: PathBuf,
}

impl Session {
    /// Session bus address inside the runtime directory
    pub fn bus_address(&self) -> String {
        format!("unix:path={}/bus", self.runtime_dir.display())
    }

    /// Wrap `inner` so it runs as this session's user with the session's
    /// display and bus environment.
    pub fn command_as(&self, sudo: &Path, inner: &CommandSpec) -> CommandSpec {
        CommandSpec::new(sudo)
            .args(["-u", self.user_name.as_str()])
            .arg("DISPLAY=:0")
            .arg(format!("XDG_RUNTIME_DIR={}", self.runtime_dir.display()))
            .arg(format!("DBUS_SESSION_BUS_ADDRESS={}", self.bus_address()))
            .arg(inner.program.clone())
            .args(inner.args.iter().cloned())
    }
}

/// Entry of `loginctl list-sessions --output=json`
#[derive(Debug, Deserialize)]
struct ListedSession {
    session: String,
}

/// Resolves active sessions through loginctl
pub struct SessionResolver<R> {
    runner: R,
    loginctl: PathBuf,
}

impl<R: CommandRunner> SessionResolver<R> {
    pub fn new(runner: R, loginctl: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            loginctl: loginctl.into(),
        }
    }

    /// All usable active sessions, one per user, in loginctl order.
    ///
    /// Listing failures yield an empty set; per-session failures skip that
    /// session.
    pub fn active_sessions(&self) -> Vec<Session> {
        let ids = match self.list_session_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("failed to get active logind session info: {}", e);
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut sessions = Vec::new();

        for id in ids {
            let props = match self.session_properties(&id) {
                Ok(props) => props,
                Err(e) => {
                    warn!(session = %id, "failed to read session properties: {}", e);
                    continue;
                }
            };

            if props.get("Active").map(String::as_str) != Some("yes") {
                debug!(session = %id, "skipping inactive session");
                continue;
            }
            if let Some(class) = props.get("Class") {
                if class != "user" {
                    debug!(session = %id, class = %class, "skipping non-user session");
                    continue;
                }
            }

            let (Some(name), Some(uid)) = (
                props.get("Name").filter(|n| !n.is_empty()),
                props.get("User").and_then(|u| u.parse::<u32>().ok()),
            ) else {
                warn!(session = %id, "session is missing Name or User");
                continue;
            };

            if !seen.insert(uid) {
                continue;
            }

            let runtime_dir = match self.runtime_dir(name) {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(user = %name, "failed to get xdg_runtime_dir: {}", e);
                    continue;
                }
            };

            sessions.push(Session {
                user_name: name.clone(),
                uid,
                runtime_dir,
            });
        }

        sessions
    }

    /// Runtime directory of `user_name`; must exist on disk
    pub fn runtime_dir(&self, user_name: &str) -> Result<PathBuf> {
        let spec = CommandSpec::new(&self.loginctl)
            .args(["show-user", user_name, "--property=RuntimePath", "--value"]);
        let out = self.exec(&spec)?;
        if !out.success() {
            return Err(UpdateError::ToolFailed {
                program: spec.program,
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        let path = PathBuf::from(out.stdout.trim());
        if path.as_os_str().is_empty() || !path.is_dir() {
            return Err(UpdateError::RuntimeDirMissing(path));
        }
        Ok(path)
    }

    fn list_session_ids(&self) -> Result<Vec<String>> {
        let spec = CommandSpec::new(&self.loginctl).args(["list-sessions", "--output=json"]);
        let out = self.exec(&spec)?;
        let listed: Vec<ListedSession> = serde_json::from_str(out.stdout.trim())?;
        Ok(listed.into_iter().map(|s| s.session).collect())
    }

    fn session_properties(&self, id: &str) -> Result<HashMap<String, String>> {
        let spec = CommandSpec::new(&self.loginctl).args([
            "show-session",
            id,
            "--property=Name",
            "--property=User",
            "--property=Active",
            "--property=Class",
        ]);
        let out = self.exec(&spec)?;
        Ok(parse_properties(&out.stdout))
    }

    fn exec(&self, spec: &CommandSpec) -> Result<crate::command::CommandOutput> {
        self.runner.run(spec).map_err(|source| UpdateError::Command {
            program: spec.program.clone(),
            source,
        })
    }
}

/// Parse `Key=Value` lines as printed by `loginctl show-*`
pub fn parse_properties(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
