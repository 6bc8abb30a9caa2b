//! Privilege scope and per-scope paths
//!
//! Root runs own the system scope and the fixed system lock; every other uid
//! gets its own scope rooted in its XDG runtime directory.

use crate::config::LockSettings;
use crate::error::{Result, UpdateError};
use std::path::PathBuf;

/// Privilege domain of the current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Root,
    User { uid: u32 },
}

impl Privilege {
    /// Detect from the effective uid of this process
    pub fn detect() -> Self {
        let uid = nix::unistd::Uid::effective();
        if uid.is_root() {
            Privilege::Root
        } else {
            Privilege::User { uid: uid.as_raw() }
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Privilege::Root)
    }

    /// Login name of the invoking user, the numeric uid when it has none
    pub fn user_name(&self) -> String {
        let uid = match self {
            Privilege::Root => 0,
            Privilege::User { uid } => *uid,
        };
        user_name_for(uid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Root => "system",
            Privilege::User { .. } => "user",
        }
    }
}

fn user_name_for(uid: u32) -> String {
    match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

/// Runtime directory of the calling user.
///
/// Priority:
/// 1. $XDG_RUNTIME_DIR
/// 2. /run/user/$UID
pub fn caller_runtime_dir(uid: u32) -> PathBuf {
    runtime_dir_from(std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from), uid)
}

fn runtime_dir_from(xdg_runtime: Option<PathBuf>, uid: u32) -> PathBuf {
    match xdg_runtime {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => PathBuf::from(format!("/run/user/{}", uid)),
    }
}

/// Lock path for a scope.
///
/// Root uses the fixed system path. A user scope lives in `runtime_dir`,
/// which must exist.
pub fn lock_path(
    privilege: Privilege,
    settings: &LockSettings,
    runtime_dir: Option<PathBuf>,
) -> Result<PathBuf> {
    match privilege {
        Privilege::Root => Ok(settings.system_path.clone()),
        Privilege::User { uid } => {
            let dir = runtime_dir.unwrap_or_else(|| caller_runtime_dir(uid));
            if !dir.is_dir() {
                return Err(UpdateError::RuntimeDirMissing(dir));
            }
            Ok(dir.join(&settings.file_name))
        }
    }
}
